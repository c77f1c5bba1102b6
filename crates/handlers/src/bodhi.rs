//! Bodhi updates for finished production builds.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dispatch::event::KojiTaskState;
use dispatch::{
    Checker, EventKind, EventPayload, ExecutionResult, HandlerDescriptor, HandlerError,
    HandlerFactory, HandlerId, JobHandler, JobType, TaskName, TaskPayload,
};
use tracing::{info, instrument};

use crate::backend::{Backend, BackendRequest};
use crate::checkers::BranchesDefinedChecker;
use crate::context::JobContext;

pub const BODHI_UPDATE: &str = "bodhi_update";
pub const BODHI_UPDATE_TASK: &str = "task.bodhi_update";

pub struct BodhiUpdateFactory {
    backend: Arc<dyn Backend>,
}

impl BodhiUpdateFactory {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

impl HandlerFactory for BodhiUpdateFactory {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor::new(
            HandlerId::from_static(BODHI_UPDATE),
            TaskName::from_static(BODHI_UPDATE_TASK),
        )
        .configured_as(JobType::BodhiUpdate)
        .reacts_to(EventKind::KojiBuild)
    }

    fn checkers(&self) -> Vec<Box<dyn Checker>> {
        vec![Box::new(BranchesDefinedChecker)]
    }

    fn build(&self, payload: &TaskPayload) -> Result<Box<dyn JobHandler>, HandlerError> {
        Ok(Box::new(BodhiUpdateHandler {
            ctx: JobContext::new(
                HandlerId::from_static(BODHI_UPDATE),
                payload,
                self.backend.clone(),
            ),
        }))
    }
}

pub struct BodhiUpdateHandler {
    ctx: JobContext,
}

#[async_trait]
impl JobHandler for BodhiUpdateHandler {
    fn id(&self) -> &HandlerId {
        self.ctx.handler()
    }

    /// Only successful builds of configured branches get an update.
    #[instrument(skip_all, fields(handler = BODHI_UPDATE))]
    async fn run(&mut self) -> Result<ExecutionResult, HandlerError> {
        let EventPayload::KojiBuild {
            build_id,
            nvr,
            branch,
            state,
        } = &self.ctx.event().payload
        else {
            return Err(HandlerError::permanent(
                "Bodhi update handler received a non-build event",
            ));
        };

        if *state != KojiTaskState::Closed {
            info!(build_id = *build_id, state = ?state, "Build did not succeed");
            return Ok(ExecutionResult::success(format!(
                "Koji build {build_id} is {state:?}, no update created"
            )));
        }
        if self.ctx.configured_event_branch().is_none() {
            return Ok(ExecutionResult::success(format!(
                "Branch {branch} is not configured for Bodhi updates"
            )));
        }

        let request = BackendRequest::BodhiUpdate {
            nvr: nvr.clone(),
            branch: branch.to_string(),
        };
        let receipt = self.ctx.submit(request).await?;
        Ok(
            ExecutionResult::success(format!("Bodhi update created for {nvr}"))
                .with_detail("update_reference", receipt.reference),
        )
    }

    fn tags(&self) -> BTreeMap<&'static str, String> {
        self.ctx.tags()
    }
}
