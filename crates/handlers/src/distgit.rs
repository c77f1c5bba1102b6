//! Dist-git handlers.
//!
//! [`ProposeDownstreamFactory`] turns an upstream release into dist-git update
//! proposals, one per configured branch. [`SyncFromDownstreamFactory`] carries
//! a push to a configured dist-git branch back to the upstream repository.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dispatch::event::PROPOSE_DOWNSTREAM_CHECK_PREFIX;
use dispatch::{
    Checker, EventKind, EventPayload, ExecutionResult, HandlerDescriptor, HandlerError,
    HandlerFactory, HandlerId, JobHandler, JobType, TagName, TaskName, TaskPayload,
};
use tracing::{info, instrument, warn};

use crate::allowlist::Allowlist;
use crate::backend::{Backend, BackendRequest};
use crate::checkers::{AllowlistChecker, BranchesDefinedChecker};
use crate::context::JobContext;

pub const PROPOSE_DOWNSTREAM: &str = "propose_downstream";
pub const PROPOSE_DOWNSTREAM_TASK: &str = "task.run_propose_downstream_handler";
pub const SYNC_FROM_DOWNSTREAM: &str = "sync_from_downstream";
pub const SYNC_FROM_DOWNSTREAM_TASK: &str = "task.run_sync_from_downstream_handler";

// ---------------------------------------------------------------------------
// Propose downstream
// ---------------------------------------------------------------------------

pub struct ProposeDownstreamFactory {
    backend: Arc<dyn Backend>,
    allowlist: Arc<Allowlist>,
}

impl ProposeDownstreamFactory {
    pub fn new(backend: Arc<dyn Backend>, allowlist: Arc<Allowlist>) -> Self {
        Self { backend, allowlist }
    }
}

impl HandlerFactory for ProposeDownstreamFactory {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor::new(
            HandlerId::from_static(PROPOSE_DOWNSTREAM),
            TaskName::from_static(PROPOSE_DOWNSTREAM_TASK),
        )
        .configured_as(JobType::ProposeDownstream)
        .reacts_to(EventKind::Release)
        .reacts_to(EventKind::IssueComment)
        .reacts_to(EventKind::CheckRerunRelease)
        .run_for_comment("propose-downstream")
        .run_for_comment("propose-update")
        .run_for_check_rerun(PROPOSE_DOWNSTREAM_CHECK_PREFIX)
    }

    fn checkers(&self) -> Vec<Box<dyn Checker>> {
        vec![
            Box::new(AllowlistChecker::new(self.allowlist.clone())),
            Box::new(BranchesDefinedChecker),
        ]
    }

    fn build(&self, payload: &TaskPayload) -> Result<Box<dyn JobHandler>, HandlerError> {
        Ok(Box::new(ProposeDownstreamHandler {
            ctx: JobContext::new(
                HandlerId::from_static(PROPOSE_DOWNSTREAM),
                payload,
                self.backend.clone(),
            ),
        }))
    }
}

pub struct ProposeDownstreamHandler {
    ctx: JobContext,
}

impl ProposeDownstreamHandler {
    fn release_tag(&self) -> Option<&TagName> {
        match &self.ctx.event().payload {
            EventPayload::Release { tag_name }
            | EventPayload::CheckRerunRelease { tag_name, .. } => Some(tag_name),
            EventPayload::IssueComment { tag_name, .. } => tag_name.as_ref(),
            _ => None,
        }
    }
}

#[async_trait]
impl JobHandler for ProposeDownstreamHandler {
    fn id(&self) -> &HandlerId {
        self.ctx.handler()
    }

    /// Proposes the release on every branch. Branches that fail are reported
    /// together; the task is retried as a whole.
    #[instrument(skip_all, fields(handler = PROPOSE_DOWNSTREAM))]
    async fn run(&mut self) -> Result<ExecutionResult, HandlerError> {
        let Some(tag) = self.release_tag().cloned() else {
            return Err(HandlerError::permanent(
                "No upstream release found to propose downstream",
            ));
        };

        let mut proposed = Vec::new();
        let mut failed = BTreeMap::new();
        let mut retry = None;

        for branch in self.ctx.branches() {
            let request = BackendRequest::ProposeDownstream {
                tag: tag.clone(),
                branch: branch.clone(),
            };
            match self.ctx.submit(request).await {
                Ok(receipt) => {
                    info!(branch = %branch, reference = %receipt.reference, "Update proposed");
                    proposed.push(branch);
                }
                Err(e) => {
                    warn!(branch = %branch, error = %e, "Proposing update failed");
                    if e.retry_policy().is_retryable() || retry.is_none() {
                        retry = Some(e.retry_policy().clone());
                    }
                    failed.insert(branch, e.message().to_string());
                }
            }
        }

        if let Some(retry) = retry {
            let branches: Vec<_> = failed.keys().map(String::as_str).collect();
            return Err(HandlerError::transient(format!(
                "Propose downstream of {tag} failed for branch(es): {}",
                branches.join(", ")
            ))
            .with_retry(retry));
        }

        Ok(ExecutionResult::success(format!(
            "Release {tag} proposed to {} branch(es)",
            proposed.len()
        ))
        .with_detail("branches", proposed))
    }

    fn tags(&self) -> BTreeMap<&'static str, String> {
        self.ctx.tags()
    }
}

// ---------------------------------------------------------------------------
// Sync from downstream
// ---------------------------------------------------------------------------

pub struct SyncFromDownstreamFactory {
    backend: Arc<dyn Backend>,
}

impl SyncFromDownstreamFactory {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

impl HandlerFactory for SyncFromDownstreamFactory {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor::new(
            HandlerId::from_static(SYNC_FROM_DOWNSTREAM),
            TaskName::from_static(SYNC_FROM_DOWNSTREAM_TASK),
        )
        .configured_as(JobType::SyncFromDownstream)
        .reacts_to(EventKind::Push)
    }

    fn checkers(&self) -> Vec<Box<dyn Checker>> {
        vec![Box::new(BranchesDefinedChecker)]
    }

    fn build(&self, payload: &TaskPayload) -> Result<Box<dyn JobHandler>, HandlerError> {
        Ok(Box::new(SyncFromDownstreamHandler {
            ctx: JobContext::new(
                HandlerId::from_static(SYNC_FROM_DOWNSTREAM),
                payload,
                self.backend.clone(),
            ),
        }))
    }
}

pub struct SyncFromDownstreamHandler {
    ctx: JobContext,
}

#[async_trait]
impl JobHandler for SyncFromDownstreamHandler {
    fn id(&self) -> &HandlerId {
        self.ctx.handler()
    }

    #[instrument(skip_all, fields(handler = SYNC_FROM_DOWNSTREAM))]
    async fn run(&mut self) -> Result<ExecutionResult, HandlerError> {
        let Some(pushed) = self.ctx.event_branch().cloned() else {
            return Err(HandlerError::permanent(
                "Sync from downstream received an event without a branch",
            ));
        };
        let Some(branch) = self.ctx.configured_event_branch() else {
            info!(branch = %pushed, "Branch is not configured for syncing");
            return Ok(ExecutionResult::success(format!(
                "Branch {pushed} is not configured for syncing"
            )));
        };

        let receipt = self
            .ctx
            .submit(BackendRequest::SyncFromDownstream {
                branch: branch.clone(),
            })
            .await?;
        Ok(
            ExecutionResult::success(format!("Dist-git branch {branch} synced upstream"))
                .with_detail("sync_reference", receipt.reference),
        )
    }

    fn tags(&self) -> BTreeMap<&'static str, String> {
        self.ctx.tags()
    }
}
