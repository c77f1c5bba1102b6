//! Port traits implemented by infrastructure crates.
//!
//! The dispatch domain needs three things from the outside world: a queue that
//! delivers tasks (possibly after a delay), a scratch directory that can be
//! wiped between tasks, and somewhere to push run counters. Each is a trait
//! here; `listener` supplies the implementations.

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{MetricsError, QueueError, WorkplaceError};
use crate::task::TaskMessage;
use crate::TaskName;

// ---------------------------------------------------------------------------
// Delivery queue
// ---------------------------------------------------------------------------

/// External delivery infrastructure for handler tasks.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Submits `message` for delivery once `countdown` has elapsed.
    ///
    /// Submission is at-least-once: a worker may see the same message twice
    /// and handlers must tolerate that.
    async fn submit(&self, message: TaskMessage, countdown: Duration) -> Result<(), QueueError>;
}

// ---------------------------------------------------------------------------
// Scratch space
// ---------------------------------------------------------------------------

/// The per-node working directory shared by tasks on one worker.
pub trait Workplace: Send + Sync {
    /// Removes everything inside the working directory.
    ///
    /// Implementations decide whether the directory is theirs to wipe; when it
    /// is not, this is a no-op.
    fn clean(&self) -> Result<(), WorkplaceError>;
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Counter incremented at a point of the task lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobMetric {
    Started,
    Succeeded,
    Failed,
    Skipped,
    Retried,
}

impl JobMetric {
    /// Every counter, in exposition order.
    pub const ALL: [JobMetric; 5] = [
        JobMetric::Started,
        JobMetric::Succeeded,
        JobMetric::Failed,
        JobMetric::Skipped,
        JobMetric::Retried,
    ];

    /// Metric name in exposition format.
    pub fn name(self) -> &'static str {
        match self {
            JobMetric::Started => "steward_tasks_started_total",
            JobMetric::Succeeded => "steward_tasks_succeeded_total",
            JobMetric::Failed => "steward_tasks_failed_total",
            JobMetric::Skipped => "steward_tasks_skipped_total",
            JobMetric::Retried => "steward_tasks_retried_total",
        }
    }
}

/// Collects run counters and pushes them out after every task.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Increments `metric` for `task_name`.
    fn record(&self, task_name: &TaskName, metric: JobMetric);

    /// Pushes the current counters to the metrics backend.
    async fn flush(&self) -> Result<(), MetricsError>;
}
