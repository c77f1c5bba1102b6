//! The boundary where handlers hand work to build, test and dist-git services.
//!
//! Talking to Copr, Testing Farm, Koji or dist-git is outside this crate.
//! Handlers describe what they want done as a [`BackendRequest`] and submit it
//! through the [`Backend`] trait. [`DryRunBackend`] acknowledges every request
//! without contacting anything.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dispatch::event::{CoprBuildStatus, KojiTaskState, TestingFarmOutcome};
use dispatch::{HandlerError, ProjectRef, RetryPolicy, TagName};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// One unit of work submitted to an external service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum BackendRequest {
    /// Start Copr builds for `targets`.
    CoprBuild { targets: BTreeSet<String> },
    /// Record the end of a Copr build.
    CoprBuildReport {
        build_id: u64,
        chroot: String,
        status: CoprBuildStatus,
    },
    /// Start Testing Farm runs for `targets`.
    TestingFarmRun { targets: BTreeSet<String> },
    /// Record a Testing Farm result.
    TestingFarmReport {
        pipeline_id: String,
        outcome: TestingFarmOutcome,
    },
    /// Open a downstream update proposal for `tag` on `branch`.
    ProposeDownstream { tag: TagName, branch: String },
    /// Start Koji scratch builds for `targets`.
    KojiScratchBuild { targets: BTreeSet<String> },
    /// Record a state change of a Koji scratch-build task.
    KojiTaskReport { task_id: u64, state: KojiTaskState },
    /// Start a production Koji build from dist-git `branch`.
    KojiBuild { branch: String },
    /// Create a Bodhi update for build `nvr` on `branch`.
    BodhiUpdate { nvr: String, branch: String },
    /// Sync dist-git `branch` back to the upstream repository.
    SyncFromDownstream { branch: String },
}

impl BackendRequest {
    /// Short name of the external service the request goes to.
    pub fn service(&self) -> &'static str {
        match self {
            BackendRequest::CoprBuild { .. } | BackendRequest::CoprBuildReport { .. } => "copr",
            BackendRequest::TestingFarmRun { .. } | BackendRequest::TestingFarmReport { .. } => {
                "testing-farm"
            }
            BackendRequest::ProposeDownstream { .. }
            | BackendRequest::SyncFromDownstream { .. } => "dist-git",
            BackendRequest::KojiScratchBuild { .. }
            | BackendRequest::KojiTaskReport { .. }
            | BackendRequest::KojiBuild { .. } => "koji",
            BackendRequest::BodhiUpdate { .. } => "bodhi",
        }
    }
}

/// Acknowledgement of an accepted request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendReceipt {
    /// Service-side reference (build id, request id, pull request URL).
    pub reference: String,
}

/// Failure reported by a backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The service could not be reached or answered with a server error.
    #[error("{service} is unavailable: {reason}")]
    Unavailable {
        /// Service name.
        service: String,
        /// What went wrong.
        reason: String,
    },

    /// The service refused the request; resubmitting it will not help.
    #[error("{service} rejected the request: {reason}")]
    Rejected {
        /// Service name.
        service: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl BackendError {
    /// Returns the appropriate retry policy for this error.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            BackendError::Unavailable { .. } => RetryPolicy::retryable(),
            BackendError::Rejected { .. } => RetryPolicy::NonRetryable,
        }
    }
}

impl From<BackendError> for HandlerError {
    fn from(e: BackendError) -> Self {
        let retry = e.retry_policy();
        HandlerError::transient(e.to_string())
            .with_retry(retry)
            .with_source(e)
    }
}

/// External services handlers submit work to.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Submits `request` on behalf of `project`.
    async fn submit(
        &self,
        project: &ProjectRef,
        request: BackendRequest,
    ) -> Result<BackendReceipt, BackendError>;
}

/// A [`Backend`] that logs every request and accepts it.
#[derive(Debug, Default)]
pub struct DryRunBackend {
    next_reference: AtomicU64,
}

impl DryRunBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for DryRunBackend {
    async fn submit(
        &self,
        project: &ProjectRef,
        request: BackendRequest,
    ) -> Result<BackendReceipt, BackendError> {
        let n = self.next_reference.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            service = request.service(),
            namespace = %project.namespace,
            repository = %project.repo_name,
            request = ?request,
            "Dry run: request accepted"
        );
        Ok(BackendReceipt {
            reference: format!("dry-run-{n}"),
        })
    }
}
