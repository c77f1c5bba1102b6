//! Task worker: executes one delivered task end to end.

use std::collections::BTreeMap;
use std::sync::Arc;

use dispatch::{
    execute_attempt, AttemptOutcome, DispatchError, HandlerFactory, JobMetric, MetricsSink,
    RetryController, RetrySettings, TaskDisposition, TaskMessage, TaskName, TaskQueue, Workplace,
};
use tracing::{error, info, instrument, warn};

pub struct TaskWorker {
    factories: BTreeMap<TaskName, Arc<dyn HandlerFactory>>,
    queue: Arc<dyn TaskQueue>,
    workplace: Arc<dyn Workplace>,
    metrics: Arc<dyn MetricsSink>,
    retry: RetrySettings,
}

impl TaskWorker {
    pub fn new(
        factories: BTreeMap<TaskName, Arc<dyn HandlerFactory>>,
        queue: Arc<dyn TaskQueue>,
        workplace: Arc<dyn Workplace>,
        metrics: Arc<dyn MetricsSink>,
        retry: RetrySettings,
    ) -> Self {
        Self {
            factories,
            queue,
            workplace,
            metrics,
            retry,
        }
    }

    /// Runs one delivery of a task.
    ///
    /// Pre-check vetoes, handler failures and panics all end in a
    /// [`TaskDisposition`]; `Err` is reserved for tasks no handler is
    /// registered for and for dispatcher bugs. Metrics are flushed after every
    /// run that reached a handler factory, whatever its outcome.
    #[instrument(
        skip_all,
        fields(task_id = %message.id, task_name = %message.task_name, attempt = message.attempt)
    )]
    pub async fn process(&self, message: &TaskMessage) -> Result<TaskDisposition, DispatchError> {
        let factory = self
            .factories
            .get(&message.task_name)
            .ok_or_else(|| DispatchError::UnknownTask {
                task_name: message.task_name.clone(),
            })?;

        self.metrics.record(&message.task_name, JobMetric::Started);

        let disposition = match execute_attempt(factory.as_ref(), message, self.workplace.as_ref())
            .await
        {
            Ok(outcome) => Ok(self.settle(message, outcome).await),
            Err(e) => {
                self.metrics.record(&message.task_name, JobMetric::Failed);
                Err(e)
            }
        };

        if let Err(e) = self.metrics.flush().await {
            warn!(error = %e, "Failed to push metrics");
        }
        disposition
    }

    async fn settle(&self, message: &TaskMessage, outcome: AttemptOutcome) -> TaskDisposition {
        if let AttemptOutcome::Failed { result, .. } = &outcome {
            error!(
                msg = result.msg().unwrap_or("handler failed"),
                "Task failed"
            );
        }

        let disposition = RetryController::new(message, self.retry, self.queue.as_ref())
            .settle(outcome)
            .await;

        let metric = match &disposition {
            TaskDisposition::Skipped => JobMetric::Skipped,
            TaskDisposition::Completed(_) => JobMetric::Succeeded,
            TaskDisposition::RetryScheduled { .. } => JobMetric::Retried,
            TaskDisposition::TerminalFailure(_) => JobMetric::Failed,
        };
        self.metrics.record(&message.task_name, metric);
        info!(outcome = ?metric, "Task settled");
        disposition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;
    use async_trait::async_trait;
    use dispatch::{
        Event, EventPayload, ExecutionResult, HandlerDescriptor, HandlerError, HandlerId,
        JobHandler, MetricsError, PackageConfig, ProjectRef, ProjectUrl, RepoName, RepoNamespace,
        TagName, TaskPayload, WorkplaceError,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const TASK: &str = "task.run_scripted_handler";

    #[derive(Clone, Copy)]
    enum Script {
        Succeed,
        Transient,
        Permanent,
    }

    struct ScriptedFactory(Script);

    impl HandlerFactory for ScriptedFactory {
        fn descriptor(&self) -> HandlerDescriptor {
            HandlerDescriptor::new(
                HandlerId::from_static("scripted"),
                TaskName::from_static(TASK),
            )
        }

        fn build(&self, _payload: &TaskPayload) -> Result<Box<dyn JobHandler>, HandlerError> {
            Ok(Box::new(ScriptedHandler {
                id: HandlerId::from_static("scripted"),
                script: self.0,
            }))
        }
    }

    struct ScriptedHandler {
        id: HandlerId,
        script: Script,
    }

    #[async_trait]
    impl JobHandler for ScriptedHandler {
        fn id(&self) -> &HandlerId {
            &self.id
        }

        async fn run(&mut self) -> Result<ExecutionResult, HandlerError> {
            match self.script {
                Script::Succeed => Ok(ExecutionResult::success("done")),
                Script::Transient => Err(HandlerError::transient("backend timed out")),
                Script::Permanent => Err(HandlerError::permanent("bad config")),
            }
        }
    }

    #[derive(Default)]
    struct CountingWorkplace(AtomicUsize);

    impl Workplace for CountingWorkplace {
        fn clean(&self) -> Result<(), WorkplaceError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingMetrics {
        recorded: Mutex<Vec<JobMetric>>,
        flushes: AtomicUsize,
    }

    #[async_trait]
    impl MetricsSink for RecordingMetrics {
        fn record(&self, _task_name: &TaskName, metric: JobMetric) {
            self.recorded.lock().unwrap().push(metric);
        }

        async fn flush(&self) -> Result<(), MetricsError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Err(MetricsError {
                reason: "gateway down".into(),
            })
        }
    }

    struct Harness {
        worker: TaskWorker,
        receiver: crate::queue::QueueReceiver,
        workplace: Arc<CountingWorkplace>,
        metrics: Arc<RecordingMetrics>,
    }

    fn harness(script: Script) -> Harness {
        let (queue, receiver) = InMemoryQueue::channel();
        let workplace = Arc::new(CountingWorkplace::default());
        let metrics = Arc::new(RecordingMetrics::default());
        let factory: Arc<dyn HandlerFactory> = Arc::new(ScriptedFactory(script));
        let worker = TaskWorker::new(
            BTreeMap::from([(TaskName::from_static(TASK), factory)]),
            Arc::new(queue),
            workplace.clone(),
            metrics.clone(),
            RetrySettings {
                retry_limit: 2,
                base_delay: Duration::ZERO,
            },
        );
        Harness {
            worker,
            receiver,
            workplace,
            metrics,
        }
    }

    fn message(task: &str) -> TaskMessage {
        TaskMessage::new(
            TaskName::new(task).unwrap(),
            TaskPayload {
                package_config: PackageConfig::default(),
                job_config: None,
                event: Event::new(
                    ProjectRef::new(
                        ProjectUrl::new("https://github.com/packit/ogr").unwrap(),
                        RepoNamespace::new("packit").unwrap(),
                        RepoName::new("ogr").unwrap(),
                    ),
                    EventPayload::Release {
                        tag_name: TagName::new("0.1.0").unwrap(),
                    },
                ),
            },
        )
    }

    #[tokio::test]
    async fn test_success_records_and_flushes() {
        let h = harness(Script::Succeed);
        let disposition = h.worker.process(&message(TASK)).await.unwrap();

        assert!(matches!(disposition, TaskDisposition::Completed(_)));
        assert_eq!(
            *h.metrics.recorded.lock().unwrap(),
            vec![JobMetric::Started, JobMetric::Succeeded]
        );
        assert_eq!(h.metrics.flushes.load(Ordering::SeqCst), 1);
        assert_eq!(h.workplace.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_is_redelivered_until_limit() {
        let mut h = harness(Script::Transient);

        let mut delivery = message(TASK);
        for expected_attempt in 1..=2 {
            let disposition = h.worker.process(&delivery).await.unwrap();
            assert!(matches!(
                disposition,
                TaskDisposition::RetryScheduled { next_attempt, .. } if next_attempt == expected_attempt
            ));
            let next = h.receiver.recv().await.unwrap();
            assert_eq!(next.id, delivery.id);
            assert_eq!(next.attempt, expected_attempt);
            delivery = next;
        }

        let disposition = h.worker.process(&delivery).await.unwrap();
        let TaskDisposition::TerminalFailure(results) = disposition else {
            panic!("expected terminal failure");
        };
        let result = results.values().next().unwrap();
        assert!(!result.success);
        assert_eq!(
            result.msg(),
            Some("Giving up after 3 attempt(s): backend timed out")
        );
        assert!(h.receiver.try_recv().is_none());
        assert_eq!(h.metrics.flushes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_redelivered() {
        let mut h = harness(Script::Permanent);
        let disposition = h.worker.process(&message(TASK)).await.unwrap();

        assert!(matches!(disposition, TaskDisposition::TerminalFailure(_)));
        assert!(h.receiver.try_recv().is_none());
        assert_eq!(
            *h.metrics.recorded.lock().unwrap(),
            vec![JobMetric::Started, JobMetric::Failed]
        );
    }

    #[tokio::test]
    async fn test_unknown_task_is_an_error() {
        let h = harness(Script::Succeed);
        let result = h.worker.process(&message("task.nobody_home")).await;

        assert!(matches!(result, Err(DispatchError::UnknownTask { .. })));
        assert!(h.metrics.recorded.lock().unwrap().is_empty());
    }
}
