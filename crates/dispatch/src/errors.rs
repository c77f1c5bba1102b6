//! Error and retry-policy types for the dispatch domain.
//!
//! [`DispatchError`] covers conditions that stop the dispatcher itself (an
//! unknown task name, an illegal lifecycle transition). Failures of the work a
//! handler performs are [`HandlerError`]s; they never escape the lifecycle and
//! only decide, through their [`RetryPolicy`], whether a task is re-delivered.
//!
//! Port-level errors ([`QueueError`], [`WorkplaceError`], [`MetricsError`]) are
//! produced by infrastructure implementations of the traits in
//! [`crate::ports`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::TaskName;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether a failure is safe to retry and, if so, after what delay.
///
/// - `Retryable` failures: forge or build-service API flakiness, timeouts,
///   services that are temporarily unavailable.
/// - `NonRetryable` failures: invalid job configuration, rejected requests,
///   anything a re-run of the same payload cannot fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The task may be re-delivered.
    Retryable {
        /// Minimum delay before the next attempt. `None` means the retry
        /// controller's exponential schedule applies.
        after: Option<Duration>,
    },
    /// The task must not be re-delivered; the attempt is terminal.
    NonRetryable,
}

impl RetryPolicy {
    /// Shorthand for a retryable failure using the default back-off schedule.
    pub fn retryable() -> Self {
        RetryPolicy::Retryable { after: None }
    }

    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Dispatcher-level errors
// ---------------------------------------------------------------------------

/// Errors raised by the dispatcher itself rather than by handler work.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A process-wide handler registry was installed twice.
    #[error("Handler registry is already installed")]
    RegistryAlreadyInstalled,

    /// A delivered task names no known handler factory.
    #[error("No handler is registered for task '{task_name}'")]
    UnknownTask {
        /// Task name carried by the delivered message.
        task_name: TaskName,
    },

    /// The attempt state machine was driven through an illegal transition.
    #[error("Invalid attempt transition from {from} to {to}")]
    InvalidTransition {
        /// State the attempt was in.
        from: &'static str,
        /// State that was requested.
        to: &'static str,
    },

    /// Submitting a task to the delivery queue failed.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

// ---------------------------------------------------------------------------
// Handler errors
// ---------------------------------------------------------------------------

/// A fault raised by a handler's `run` or `clean` step.
///
/// The lifecycle converts every [`HandlerError`] into a failed
/// [`crate::ExecutionResult`]; the attached [`RetryPolicy`] decides whether
/// the task is re-delivered.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    retry: RetryPolicy,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    /// A failure that may succeed when the same payload is delivered again.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry: RetryPolicy::retryable(),
            source: None,
        }
    }

    /// A failure that re-delivery cannot fix.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry: RetryPolicy::NonRetryable,
            source: None,
        }
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Human-readable failure description.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether and when the failure may be retried.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

// ---------------------------------------------------------------------------
// Port errors
// ---------------------------------------------------------------------------

/// Failure to hand a task to the delivery infrastructure.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue no longer accepts messages (consumer gone, broker shut down).
    #[error("Task queue is closed")]
    Closed,

    /// The broker rejected the message.
    #[error("Task queue rejected the message: {reason}")]
    Rejected {
        /// Broker-provided reason.
        reason: String,
    },
}

/// Failure while wiping the per-node scratch directory.
#[derive(Debug, Error)]
#[error("Failed to clean workplace '{path}': {source}")]
pub struct WorkplaceError {
    /// Path that could not be removed.
    pub path: String,
    /// Underlying I/O failure.
    #[source]
    pub source: std::io::Error,
}

/// Failure while pushing metrics after a run.
#[derive(Debug, Error)]
#[error("Metrics flush failed: {reason}")]
pub struct MetricsError {
    /// Description of the failure.
    pub reason: String,
}
