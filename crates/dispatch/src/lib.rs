//! Core dispatch domain for Steward.
//!
//! This crate turns an inbound repository event and the project's package
//! configuration into independently schedulable handler tasks, and defines how
//! each task attempt executes and is retried. Infrastructure crates implement
//! the ports defined here; they never add dispatch rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype domain identifiers (`HandlerId`, `TaskName`, etc.) |
//! | [`types`] | Shared value types (`Timestamp`) |
//! | [`errors`] | Error and retry-policy types |
//! | [`job`] | Job types and project package configuration |
//! | [`event`] | Inbound events, event kinds and matchers |
//! | [`registry`] | Handler descriptors and the immutable handler registry |
//! | [`resolver`] | Event + configuration to dispatch units |
//! | [`task`] | Dispatch units and queue messages |
//! | [`result`] | Execution results and result keys |
//! | [`ports`] | Queue, workplace and metrics traits |
//! | [`lifecycle`] | Pre-check, run, clean-up execution contract |
//! | [`retry`] | Retry controller and task dispositions |

pub mod errors;
pub mod event;
pub mod identifiers;
pub mod job;
pub mod lifecycle;
pub mod ports;
pub mod registry;
pub mod resolver;
pub mod result;
pub mod retry;
pub mod task;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{
    DispatchError, HandlerError, MetricsError, QueueError, RetryPolicy, WorkplaceError,
};
pub use event::{
    Event, EventKind, EventMatcher, EventPayload, ProjectRef, PullRequestAction, TargetOverrides,
};
pub use identifiers::{
    ActorLogin, CheckName, CommentId, CommitSha, GitRef, HandlerId, IssueId, ProjectUrl,
    PullRequestId, RepoName, RepoNamespace, TagName, TaskId, TaskName,
};
pub use job::{JobConfig, JobConfigTriggerType, JobType, PackageConfig};
pub use lifecycle::{
    execute_attempt, AttemptOutcome, CheckContext, Checker, HandlerFactory, JobHandler,
};
pub use ports::{JobMetric, MetricsSink, TaskQueue, Workplace};
pub use registry::{HandlerDescriptor, HandlerRegistry, RegistryBuilder};
pub use resolver::{JobResolver, DEFAULT_COMMAND_PREFIX};
pub use result::{ExecutionResult, JobResults, ResultKey};
pub use retry::{RetryController, RetrySettings, TaskDisposition};
pub use task::{DispatchUnit, TaskMessage, TaskPayload, UnitOrigin};
pub use types::Timestamp;
