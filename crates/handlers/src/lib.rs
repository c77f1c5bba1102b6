//! Steward handler implementations.
//!
//! This crate provides the built-in handler variants (Copr builds, Testing
//! Farm runs, Koji builds and their reports, dist-git sync and proposals,
//! Bodhi updates), the pre-check predicates they share, and the explicit
//! handler list the registry is built from.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Handlers sequence calls between the dispatch
//! domain in the [`dispatch`] crate and the external services behind the
//! [`Backend`] trait. They contain no dispatch rules of their own.

pub mod allowlist;
pub mod backend;
pub mod bodhi;
pub mod checkers;
pub mod context;
pub mod copr;
pub mod distgit;
pub mod koji;
pub mod registration;
pub mod testing_farm;

pub use allowlist::{namespace_path, Allowlist, AllowlistStatus};
pub use backend::{Backend, BackendError, BackendReceipt, BackendRequest, DryRunBackend};
pub use checkers::{AllowlistChecker, BranchesDefinedChecker, TargetsDefinedChecker};
pub use registration::{default_factories, default_registry, factories_by_task_name};
