//! Steward worker infrastructure.
//!
//! Implements the ports declared by the [`dispatch`] crate and wires them into
//! the two entry points of a worker process:
//!
//! - [`EventIntake`] resolves an incoming event against the project's package
//!   configuration and submits one task per dispatch unit.
//! - [`TaskWorker`] executes a delivered task, settles retries and pushes run
//!   counters.
//!
//! | Port | Implementation | Notes |
//! |------|----------------|-------|
//! | [`dispatch::TaskQueue`] | [`InMemoryQueue`] | tokio channel, countdown via a sleeping task |
//! | [`dispatch::Workplace`] | [`ScratchVolume`] | Wiped only inside a sandbox pod |
//! | [`dispatch::MetricsSink`] | [`PushgatewayMetrics`] | Text exposition pushed over HTTP |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Environment variables, the filesystem, HTTP and the
//! tokio runtime live here. The [`dispatch`] crate sees only its own port
//! traits.

pub mod config;
pub mod intake;
pub mod metrics;
pub mod queue;
pub mod worker;
pub mod workplace;

pub use config::{ConfigError, WorkerConfig};
pub use intake::EventIntake;
pub use metrics::PushgatewayMetrics;
pub use queue::{InMemoryQueue, QueueReceiver};
pub use worker::TaskWorker;
pub use workplace::ScratchVolume;
