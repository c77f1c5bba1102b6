//! Retry controller.
//!
//! A [`RetryController`] wraps one delivered [`TaskMessage`]. It knows the
//! delivery's attempt count and the effective retry limit, computes the
//! exponential back-off, and re-submits the unmodified message for another
//! delivery. Retries are stateless restarts: the next attempt receives exactly
//! the payload the first one did.

use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::errors::RetryPolicy;
use crate::lifecycle::AttemptOutcome;
use crate::ports::TaskQueue;
use crate::result::{ExecutionResult, JobResults, ResultKey, MSG_DETAIL};
use crate::task::TaskMessage;
use crate::types::Timestamp;

/// Retries allowed when no override is configured.
pub const DEFAULT_RETRY_LIMIT: u32 = 2;

/// Delay before the first retry; doubles with every attempt.
pub const BASE_RETRY_DELAY: Duration = Duration::from_secs(120);

/// Environment variable overriding [`DEFAULT_RETRY_LIMIT`].
pub const RETRY_LIMIT_ENV: &str = "STEWARD_RETRY_LIMIT";

/// Largest accepted override; with the default base this is about 91 days of
/// back-off before the last attempt.
pub const MAX_RETRY_LIMIT: u32 = 16;

const NANOS_PER_SEC: u128 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Retry limit and back-off base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub retry_limit: u32,
    pub base_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            retry_limit: DEFAULT_RETRY_LIMIT,
            base_delay: BASE_RETRY_DELAY,
        }
    }
}

impl RetrySettings {
    /// Reads the retry limit override from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the retry limit override through `lookup`.
    ///
    /// Values that do not parse as a non-negative integer fall back to the
    /// default. Values above [`MAX_RETRY_LIMIT`] are clamped to it.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();
        if let Some(raw) = lookup(RETRY_LIMIT_ENV) {
            match raw.trim().parse::<u32>() {
                Ok(limit) if limit > MAX_RETRY_LIMIT => {
                    warn!(
                        value = limit,
                        max = MAX_RETRY_LIMIT,
                        "Clamping {RETRY_LIMIT_ENV}"
                    );
                    settings.retry_limit = MAX_RETRY_LIMIT;
                }
                Ok(limit) => settings.retry_limit = limit,
                Err(_) => warn!(
                    value = %raw,
                    default = DEFAULT_RETRY_LIMIT,
                    "Ignoring unparsable {RETRY_LIMIT_ENV}"
                ),
            }
        }
        settings
    }

    /// Default delay before re-delivering after attempt `attempt`:
    /// `base * 2^attempt`, saturating at [`Duration::MAX`].
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let nanos = match 1u128.checked_shl(attempt) {
            Some(factor) => self.base_delay.as_nanos().saturating_mul(factor),
            None => u128::MAX,
        };
        match u64::try_from(nanos / NANOS_PER_SEC) {
            Ok(secs) => Duration::new(secs, (nanos % NANOS_PER_SEC) as u32),
            Err(_) => Duration::MAX,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// What became of a delivered task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskDisposition {
    /// A pre-check vetoed the task.
    Skipped,
    /// The handler succeeded.
    Completed(JobResults),
    /// The task was re-submitted.
    RetryScheduled { next_attempt: u32, delay: Duration },
    /// The task failed and will not be delivered again.
    TerminalFailure(JobResults),
}

impl TaskDisposition {
    /// Results exposed to the caller, when the task reached a final state.
    pub fn results(&self) -> Option<&JobResults> {
        match self {
            TaskDisposition::Completed(results) | TaskDisposition::TerminalFailure(results) => {
                Some(results)
            }
            TaskDisposition::Skipped | TaskDisposition::RetryScheduled { .. } => None,
        }
    }
}

/// Retry decisions for one delivered task.
pub struct RetryController<'a> {
    message: &'a TaskMessage,
    settings: RetrySettings,
    queue: &'a dyn TaskQueue,
}

impl<'a> RetryController<'a> {
    pub fn new(
        message: &'a TaskMessage,
        settings: RetrySettings,
        queue: &'a dyn TaskQueue,
    ) -> Self {
        Self {
            message,
            settings,
            queue,
        }
    }

    /// Number of previous deliveries of this task.
    pub fn attempt(&self) -> u32 {
        self.message.attempt
    }

    /// Configured retry limit.
    pub fn retry_limit(&self) -> u32 {
        self.settings.retry_limit
    }

    /// `true` once the delivery count has reached the retry limit.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt() >= self.retry_limit()
    }

    /// Default delay before the next delivery.
    pub fn backoff_delay(&self) -> Duration {
        self.settings.backoff_delay(self.attempt())
    }

    /// Re-submits the task for another delivery.
    ///
    /// `delay` defaults to [`Self::backoff_delay`]. `max_retries` overrides the
    /// limit for this and later deliveries; when the current attempt already
    /// reached it, nothing is submitted. Never fails: queue errors are logged
    /// and reported as `false`.
    #[instrument(
        skip_all,
        fields(task_name = %self.message.task_name, attempt = self.message.attempt)
    )]
    pub async fn retry(
        &self,
        cause: &str,
        delay: Option<Duration>,
        max_retries: Option<u32>,
    ) -> bool {
        let limit = max_retries.or(self.message.max_retries);
        if let Some(limit) = limit {
            if self.attempt() >= limit {
                warn!(limit, cause, "Retry limit reached, not re-submitting");
                return false;
            }
        }

        let delay = delay.unwrap_or_else(|| self.backoff_delay());
        let next = self.message.redelivery(max_retries);
        info!(
            cause,
            "Will retry for the {}. time in {}s",
            next.attempt,
            delay.as_secs()
        );

        match self.queue.submit(next, delay).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to re-submit task");
                false
            }
        }
    }

    /// Turns an attempt's outcome into the task's disposition, re-submitting
    /// retryable failures that have attempts left.
    pub async fn settle(&self, outcome: AttemptOutcome) -> TaskDisposition {
        match outcome {
            AttemptOutcome::Skipped => TaskDisposition::Skipped,
            AttemptOutcome::Succeeded(result) => TaskDisposition::Completed(self.results(result)),
            AttemptOutcome::Failed { result, retry } => {
                let cause = result.msg().unwrap_or("handler failed").to_string();

                if let RetryPolicy::Retryable { after } = retry {
                    if !self.is_last_attempt() {
                        let delay = after.unwrap_or_else(|| self.backoff_delay());
                        if self.retry(&cause, Some(delay), None).await {
                            return TaskDisposition::RetryScheduled {
                                next_attempt: self.attempt().saturating_add(1),
                                delay,
                            };
                        }
                    }
                    let attempts = self.attempt().saturating_add(1);
                    let result = result.with_detail(
                        MSG_DETAIL,
                        format!("Giving up after {attempts} attempt(s): {cause}"),
                    );
                    return TaskDisposition::TerminalFailure(self.results(result));
                }

                TaskDisposition::TerminalFailure(self.results(result))
            }
        }
    }

    fn results(&self, result: ExecutionResult) -> JobResults {
        let key = ResultKey::new(
            self.message.payload.job_config.as_ref(),
            &self.message.task_name,
            Timestamp::now(),
        );
        let result = result.with_detail("attempt", self.attempt());
        JobResults::from([(key, result)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::QueueError;
    use crate::event::{Event, EventPayload, ProjectRef};
    use crate::job::{JobConfig, JobConfigTriggerType, JobType, PackageConfig};
    use crate::task::TaskPayload;
    use crate::{CommentId, ProjectUrl, PullRequestId, RepoName, RepoNamespace, TaskName};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingQueue {
        submitted: Mutex<Vec<(TaskMessage, Duration)>>,
        closed: bool,
    }

    #[async_trait]
    impl TaskQueue for RecordingQueue {
        async fn submit(&self, message: TaskMessage, countdown: Duration) -> Result<(), QueueError> {
            if self.closed {
                return Err(QueueError::Closed);
            }
            self.submitted.lock().unwrap().push((message, countdown));
            Ok(())
        }
    }

    fn message(attempt: u32) -> TaskMessage {
        let event = Event::new(
            ProjectRef::new(
                ProjectUrl::new("https://github.com/packit/ogr").unwrap(),
                RepoNamespace::new("packit").unwrap(),
                RepoName::new("ogr").unwrap(),
            ),
            EventPayload::PullRequestComment {
                pr_id: PullRequestId::new(9),
                comment_id: CommentId::new(1),
                comment: "/steward build".to_string(),
            },
        );
        let job = JobConfig::new(JobType::CoprBuild, JobConfigTriggerType::PullRequest);
        let mut message = TaskMessage::new(
            TaskName::new("task.run_copr_build_handler").unwrap(),
            TaskPayload {
                package_config: PackageConfig::with_jobs(vec![job.clone()]),
                job_config: Some(job),
                event,
            },
        );
        message.attempt = attempt;
        message
    }

    fn failed(retry: RetryPolicy) -> AttemptOutcome {
        AttemptOutcome::Failed {
            result: ExecutionResult::failure("Copr API timeout"),
            retry,
        }
    }

    #[test]
    fn test_backoff_doubles_from_base() {
        let settings = RetrySettings::default();
        let delays: Vec<u64> = (0..4).map(|a| settings.backoff_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![120, 240, 480, 960]);

        // 120 * 2^56 still fits in u64 seconds.
        for attempt in 1..=56 {
            assert!(
                settings.backoff_delay(attempt) > settings.backoff_delay(attempt - 1),
                "attempt {attempt}"
            );
        }
        assert_eq!(
            settings.backoff_delay(MAX_RETRY_LIMIT).as_secs(),
            120 * (1u64 << MAX_RETRY_LIMIT)
        );
        assert_eq!(settings.backoff_delay(200), Duration::MAX);
    }

    #[test]
    fn test_backoff_keeps_subsecond_base() {
        let settings = RetrySettings {
            retry_limit: DEFAULT_RETRY_LIMIT,
            base_delay: Duration::from_millis(1500),
        };
        assert_eq!(settings.backoff_delay(1), Duration::from_secs(3));
        assert_eq!(settings.backoff_delay(2), Duration::from_secs(6));
    }

    #[test]
    fn test_retry_limit_override_from_lookup() {
        let settings = RetrySettings::from_lookup(|key| {
            (key == RETRY_LIMIT_ENV).then(|| "5".to_string())
        });
        assert_eq!(settings.retry_limit, 5);

        let settings = RetrySettings::from_lookup(|_| Some("100".to_string()));
        assert_eq!(settings.retry_limit, MAX_RETRY_LIMIT);

        let settings = RetrySettings::from_lookup(|_| Some("many".to_string()));
        assert_eq!(settings.retry_limit, DEFAULT_RETRY_LIMIT);

        let settings = RetrySettings::from_lookup(|_| None);
        assert_eq!(settings.retry_limit, DEFAULT_RETRY_LIMIT);
    }

    #[test]
    fn test_is_last_attempt_at_limit() {
        let queue = RecordingQueue::default();
        let settings = RetrySettings::default();
        for (attempt, last) in [(0, false), (1, false), (2, true), (3, true)] {
            let message = message(attempt);
            let controller = RetryController::new(&message, settings, &queue);
            assert_eq!(controller.is_last_attempt(), last, "attempt {attempt}");
        }
    }

    #[tokio::test]
    async fn test_retry_resubmits_identical_payload() {
        let queue = RecordingQueue::default();
        let first = message(1);
        let controller = RetryController::new(&first, RetrySettings::default(), &queue);

        assert!(controller.retry("flaky", None, None).await);

        let submitted = queue.submitted.lock().unwrap();
        let (next, delay) = &submitted[0];
        assert_eq!(*delay, Duration::from_secs(240));
        assert_eq!(next.attempt, 2);
        assert_eq!(next.id, first.id);
        assert_eq!(next.payload, first.payload);
    }

    #[tokio::test]
    async fn test_retry_respects_explicit_max_retries() {
        let queue = RecordingQueue::default();
        let message = message(1);
        let controller = RetryController::new(&message, RetrySettings::default(), &queue);

        assert!(!controller.retry("flaky", Some(Duration::from_secs(5)), Some(1)).await);
        assert!(queue.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_swallows_queue_errors() {
        let queue = RecordingQueue {
            closed: true,
            ..Default::default()
        };
        let message = message(0);
        let controller = RetryController::new(&message, RetrySettings::default(), &queue);
        assert!(!controller.retry("flaky", None, None).await);
    }

    #[tokio::test]
    async fn test_settle_schedules_retryable_failure() {
        let queue = RecordingQueue::default();
        let message = message(0);
        let controller = RetryController::new(&message, RetrySettings::default(), &queue);

        let disposition = controller.settle(failed(RetryPolicy::retryable())).await;

        assert_eq!(
            disposition,
            TaskDisposition::RetryScheduled {
                next_attempt: 1,
                delay: Duration::from_secs(120)
            }
        );
        assert!(disposition.results().is_none());
    }

    #[tokio::test]
    async fn test_settle_honours_explicit_retry_after() {
        let queue = RecordingQueue::default();
        let message = message(1);
        let controller = RetryController::new(&message, RetrySettings::default(), &queue);

        let disposition = controller
            .settle(failed(RetryPolicy::Retryable {
                after: Some(Duration::from_secs(30)),
            }))
            .await;

        assert_eq!(
            disposition,
            TaskDisposition::RetryScheduled {
                next_attempt: 2,
                delay: Duration::from_secs(30)
            }
        );
    }

    #[tokio::test]
    async fn test_settle_gives_up_on_last_attempt() {
        let queue = RecordingQueue::default();
        let message = message(2);
        let controller = RetryController::new(&message, RetrySettings::default(), &queue);

        let disposition = controller.settle(failed(RetryPolicy::retryable())).await;

        let TaskDisposition::TerminalFailure(results) = disposition else {
            panic!("expected terminal failure");
        };
        assert_eq!(results.len(), 1);
        let (key, result) = results.iter().next().unwrap();
        assert!(key.as_str().starts_with("copr_build-"));
        assert!(!result.success);
        assert_eq!(
            result.msg(),
            Some("Giving up after 3 attempt(s): Copr API timeout")
        );
        assert!(queue.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settle_non_retryable_is_terminal_immediately() {
        let queue = RecordingQueue::default();
        let message = message(0);
        let controller = RetryController::new(&message, RetrySettings::default(), &queue);

        let disposition = controller.settle(failed(RetryPolicy::NonRetryable)).await;

        let results = disposition.results().unwrap();
        assert_eq!(
            results.values().next().unwrap().msg(),
            Some("Copr API timeout")
        );
        assert!(queue.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settle_success_and_skip() {
        let queue = RecordingQueue::default();
        let message = message(0);
        let controller = RetryController::new(&message, RetrySettings::default(), &queue);

        assert_eq!(
            controller.settle(AttemptOutcome::Skipped).await,
            TaskDisposition::Skipped
        );
        let disposition = controller
            .settle(AttemptOutcome::Succeeded(ExecutionResult::success("built")))
            .await;
        assert!(matches!(disposition, TaskDisposition::Completed(_)));
        assert!(disposition.results().unwrap().values().all(|r| r.success));
    }
}
