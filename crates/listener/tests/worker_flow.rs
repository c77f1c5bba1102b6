//! Event intake through task execution, with the built-in handlers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dispatch::{
    Event, EventPayload, GitRef, HandlerRegistry, JobConfig, JobConfigTriggerType, JobMetric,
    JobType, PackageConfig, ProjectRef, ProjectUrl, PullRequestAction, PullRequestId, RepoName,
    RepoNamespace, RetrySettings, TaskDisposition, TaskMessage,
};
use handlers::{
    default_factories, default_registry, factories_by_task_name, Allowlist, Backend,
    BackendError, BackendReceipt, BackendRequest, DryRunBackend,
};
use listener::{
    EventIntake, InMemoryQueue, PushgatewayMetrics, QueueReceiver, ScratchVolume, TaskWorker,
};

struct UnavailableBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl Backend for UnavailableBackend {
    async fn submit(
        &self,
        _project: &ProjectRef,
        request: BackendRequest,
    ) -> Result<BackendReceipt, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::Unavailable {
            service: request.service().to_string(),
            reason: "503 Service Unavailable".into(),
        })
    }
}

struct Service {
    registry: HandlerRegistry,
    queue: Arc<InMemoryQueue>,
    worker: TaskWorker,
    receiver: QueueReceiver,
    metrics: Arc<PushgatewayMetrics>,
    _scratch: tempfile::TempDir,
}

fn service(backend: Arc<dyn Backend>, allowlist: Allowlist) -> Service {
    let factories = default_factories(backend, Arc::new(allowlist));
    let (queue, receiver) = InMemoryQueue::channel();
    let queue = Arc::new(queue);
    let scratch = tempfile::tempdir().unwrap();
    let metrics = Arc::new(PushgatewayMetrics::new(None));

    let worker = TaskWorker::new(
        factories_by_task_name(&factories),
        queue.clone(),
        Arc::new(ScratchVolume::new(scratch.path(), true)),
        metrics.clone(),
        RetrySettings {
            retry_limit: 2,
            base_delay: Duration::ZERO,
        },
    );
    Service {
        registry: default_registry(&factories),
        queue,
        worker,
        receiver,
        metrics,
        _scratch: scratch,
    }
}

impl Service {
    fn intake(&self) -> EventIntake<'_> {
        EventIntake::new(&self.registry, self.queue.clone())
    }
}

fn pull_request(url: &str, namespace: &str) -> Event {
    Event::new(
        ProjectRef::new(
            ProjectUrl::new(url).unwrap(),
            RepoNamespace::new(namespace).unwrap(),
            RepoName::new("ogr").unwrap(),
        ),
        EventPayload::PullRequest {
            action: PullRequestAction::Synchronize,
            pr_id: PullRequestId::new(11),
            base_ref: GitRef::new("main").unwrap(),
        },
    )
}

fn tests_only_config() -> PackageConfig {
    PackageConfig::with_jobs(vec![JobConfig::new(
        JobType::Tests,
        JobConfigTriggerType::PullRequest,
    )
    .with_targets(["fedora-rawhide-x86_64"])])
}

async fn drain(service: &mut Service) -> Vec<(TaskMessage, TaskDisposition)> {
    let mut seen = Vec::new();
    while let Some(message) = service.receiver.try_recv() {
        let disposition = service.worker.process(&message).await.unwrap();
        seen.push((message, disposition));
    }
    seen
}

#[tokio::test]
async fn test_pull_request_runs_tests_and_inferred_build() {
    let mut svc = service(Arc::new(DryRunBackend::new()), Allowlist::permissive());
    let event = pull_request("https://github.com/packit/ogr", "packit");

    let submitted = svc.intake().process(&event, &tests_only_config()).await.unwrap();
    assert_eq!(submitted.len(), 2);

    let seen = drain(&mut svc).await;
    let names: Vec<_> = seen.iter().map(|(m, _)| m.task_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "task.run_testing_farm_handler",
            "task.run_copr_build_handler"
        ]
    );
    for (_, disposition) in &seen {
        let TaskDisposition::Completed(results) = disposition else {
            panic!("expected completion, got {disposition:?}");
        };
        assert!(results.values().all(|r| r.success));
    }

    let build = &seen[1].0;
    assert_eq!(svc.metrics.count(&build.task_name, JobMetric::Succeeded), 1);
}

#[tokio::test]
async fn test_unapproved_namespace_is_skipped() {
    let allowlist = Allowlist::from_json(r#"{"github.com/packit": "approved_manually"}"#).unwrap();
    let mut svc = service(Arc::new(DryRunBackend::new()), allowlist);
    let event = pull_request("https://github.com/someone-else/ogr", "someone-else");

    svc.intake().process(&event, &tests_only_config()).await.unwrap();
    let seen = drain(&mut svc).await;

    assert_eq!(seen.len(), 2);
    assert!(seen
        .iter()
        .all(|(_, d)| matches!(d, TaskDisposition::Skipped)));
}

#[tokio::test]
async fn test_unavailable_backend_is_retried_then_given_up() {
    let backend = Arc::new(UnavailableBackend {
        calls: AtomicUsize::new(0),
    });
    let mut svc = service(backend.clone(), Allowlist::permissive());
    let event = pull_request("https://github.com/packit/ogr", "packit");
    let config = PackageConfig::with_jobs(vec![JobConfig::new(
        JobType::CoprBuild,
        JobConfigTriggerType::PullRequest,
    )
    .with_targets(["fedora-rawhide-x86_64"])]);

    svc.intake().process(&event, &config).await.unwrap();
    let seen = drain(&mut svc).await;

    let attempts: Vec<u32> = seen.iter().map(|(m, _)| m.attempt).collect();
    assert_eq!(attempts, vec![0, 1, 2]);
    assert!(seen.iter().all(|(m, _)| m.id == seen[0].0.id));
    assert_eq!(backend.calls.load(Ordering::SeqCst), 3);

    let TaskDisposition::TerminalFailure(results) = &seen[2].1 else {
        panic!("expected terminal failure");
    };
    let result = results.values().next().unwrap();
    assert!(result
        .msg()
        .unwrap()
        .starts_with("Giving up after 3 attempt(s):"));
}
