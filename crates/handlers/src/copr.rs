//! Copr build handlers.
//!
//! [`CoprBuildFactory`] starts builds for a revision; it is also the
//! prerequisite of test jobs, so a project that only declares tests still gets
//! a build. [`CoprBuildEndFactory`] records build completions reported by Copr.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dispatch::event::{CoprBuildStatus, BUILD_CHECK_PREFIX};
use dispatch::{
    Checker, EventKind, EventMatcher, EventPayload, ExecutionResult, HandlerDescriptor,
    HandlerError, HandlerFactory, HandlerId, JobHandler, JobType, TaskName, TaskPayload,
};
use tracing::{info, instrument};

use crate::allowlist::Allowlist;
use crate::backend::{Backend, BackendRequest};
use crate::checkers::{AllowlistChecker, TargetsDefinedChecker};
use crate::context::JobContext;

pub const COPR_BUILD: &str = "copr_build";
pub const COPR_BUILD_TASK: &str = "task.run_copr_build_handler";
pub const COPR_BUILD_END: &str = "copr_build_end";
pub const COPR_BUILD_END_TASK: &str = "task.run_copr_build_end_handler";

// ---------------------------------------------------------------------------
// Build start
// ---------------------------------------------------------------------------

pub struct CoprBuildFactory {
    backend: Arc<dyn Backend>,
    allowlist: Arc<Allowlist>,
}

impl CoprBuildFactory {
    pub fn new(backend: Arc<dyn Backend>, allowlist: Arc<Allowlist>) -> Self {
        Self { backend, allowlist }
    }
}

impl HandlerFactory for CoprBuildFactory {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor::new(
            HandlerId::from_static(COPR_BUILD),
            TaskName::from_static(COPR_BUILD_TASK),
        )
        .configured_as(JobType::CoprBuild)
        .configured_as(JobType::Build)
        .required_for(JobType::Tests)
        .reacts_to(EventKind::PullRequest)
        .reacts_to(EventKind::Push)
        .reacts_to(EventKind::Release)
        .reacts_to(EventKind::PullRequestComment)
        .reacts_to(EventMatcher::AnyCheckRerun)
        .run_for_comment("build")
        .run_for_comment("copr-build")
        .run_for_comment("rebuild")
        .run_for_check_rerun(BUILD_CHECK_PREFIX)
    }

    fn checkers(&self) -> Vec<Box<dyn Checker>> {
        vec![
            Box::new(AllowlistChecker::new(self.allowlist.clone())),
            Box::new(TargetsDefinedChecker),
        ]
    }

    fn build(&self, payload: &TaskPayload) -> Result<Box<dyn JobHandler>, HandlerError> {
        Ok(Box::new(CoprBuildHandler {
            ctx: JobContext::new(
                HandlerId::from_static(COPR_BUILD),
                payload,
                self.backend.clone(),
            ),
        }))
    }
}

pub struct CoprBuildHandler {
    ctx: JobContext,
}

#[async_trait]
impl JobHandler for CoprBuildHandler {
    fn id(&self) -> &HandlerId {
        self.ctx.handler()
    }

    #[instrument(skip_all, fields(handler = COPR_BUILD))]
    async fn run(&mut self) -> Result<ExecutionResult, HandlerError> {
        let targets = self.ctx.build_targets();
        if targets.is_empty() {
            return Err(HandlerError::permanent("No build targets to submit"));
        }
        info!(targets = ?targets, "Submitting Copr build");
        let receipt = self
            .ctx
            .submit(BackendRequest::CoprBuild {
                targets: targets.clone(),
            })
            .await?;
        Ok(
            ExecutionResult::success(format!("Copr build submitted for {} target(s)", targets.len()))
                .with_detail("build_reference", receipt.reference)
                .with_detail("targets", targets.into_iter().collect::<Vec<_>>()),
        )
    }

    fn tags(&self) -> BTreeMap<&'static str, String> {
        self.ctx.tags()
    }
}

// ---------------------------------------------------------------------------
// Build end
// ---------------------------------------------------------------------------

pub struct CoprBuildEndFactory {
    backend: Arc<dyn Backend>,
}

impl CoprBuildEndFactory {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

impl HandlerFactory for CoprBuildEndFactory {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor::new(
            HandlerId::from_static(COPR_BUILD_END),
            TaskName::from_static(COPR_BUILD_END_TASK),
        )
        .configured_as(JobType::CoprBuild)
        .configured_as(JobType::Build)
        .required_for(JobType::Tests)
        .reacts_to(EventKind::CoprBuild)
    }

    fn build(&self, payload: &TaskPayload) -> Result<Box<dyn JobHandler>, HandlerError> {
        Ok(Box::new(CoprBuildEndHandler {
            ctx: JobContext::new(
                HandlerId::from_static(COPR_BUILD_END),
                payload,
                self.backend.clone(),
            ),
        }))
    }
}

pub struct CoprBuildEndHandler {
    ctx: JobContext,
}

#[async_trait]
impl JobHandler for CoprBuildEndHandler {
    fn id(&self) -> &HandlerId {
        self.ctx.handler()
    }

    #[instrument(skip_all, fields(handler = COPR_BUILD_END))]
    async fn run(&mut self) -> Result<ExecutionResult, HandlerError> {
        let EventPayload::CoprBuild {
            build_id,
            chroot,
            status,
        } = &self.ctx.event().payload
        else {
            return Err(HandlerError::permanent(
                "Copr build end handler received a non-build event",
            ));
        };

        if *status == CoprBuildStatus::Started {
            return Ok(ExecutionResult::success(format!(
                "Copr build {build_id} started for {chroot}"
            )));
        }

        let request = BackendRequest::CoprBuildReport {
            build_id: *build_id,
            chroot: chroot.clone(),
            status: *status,
        };
        self.ctx.submit(request).await?;

        Ok(ExecutionResult::success(format!(
            "Copr build {build_id} for {chroot} finished: {status:?}"
        ))
        .with_detail("build_id", *build_id))
    }

    fn tags(&self) -> BTreeMap<&'static str, String> {
        self.ctx.tags()
    }
}
