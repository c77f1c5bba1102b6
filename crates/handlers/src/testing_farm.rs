//! Testing Farm handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dispatch::event::{CoprBuildStatus, TestingFarmOutcome, TESTS_CHECK_PREFIX};
use dispatch::{
    Checker, EventKind, EventMatcher, EventPayload, ExecutionResult, HandlerDescriptor,
    HandlerError, HandlerFactory, HandlerId, JobHandler, JobType, TaskName, TaskPayload,
};
use tracing::{debug, info, instrument};

use crate::allowlist::Allowlist;
use crate::backend::{Backend, BackendRequest};
use crate::checkers::{AllowlistChecker, TargetsDefinedChecker};
use crate::context::JobContext;

pub const TESTING_FARM: &str = "testing_farm";
pub const TESTING_FARM_TASK: &str = "task.run_testing_farm_handler";
pub const TESTING_FARM_RESULTS: &str = "testing_farm_results";
pub const TESTING_FARM_RESULTS_TASK: &str = "task.run_testing_farm_results_handler";

pub struct TestingFarmFactory {
    backend: Arc<dyn Backend>,
    allowlist: Arc<Allowlist>,
}

impl TestingFarmFactory {
    pub fn new(backend: Arc<dyn Backend>, allowlist: Arc<Allowlist>) -> Self {
        Self { backend, allowlist }
    }
}

impl HandlerFactory for TestingFarmFactory {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor::new(
            HandlerId::from_static(TESTING_FARM),
            TaskName::from_static(TESTING_FARM_TASK),
        )
        .configured_as(JobType::Tests)
        .reacts_to(EventKind::PullRequest)
        .reacts_to(EventKind::PullRequestComment)
        .reacts_to(EventMatcher::AnyCheckRerun)
        .reacts_to(EventKind::CoprBuild)
        .run_for_comment("test")
        .run_for_check_rerun(TESTS_CHECK_PREFIX)
    }

    fn checkers(&self) -> Vec<Box<dyn Checker>> {
        vec![
            Box::new(AllowlistChecker::new(self.allowlist.clone())),
            Box::new(TargetsDefinedChecker),
        ]
    }

    fn build(&self, payload: &TaskPayload) -> Result<Box<dyn JobHandler>, HandlerError> {
        Ok(Box::new(TestingFarmHandler {
            ctx: JobContext::new(
                HandlerId::from_static(TESTING_FARM),
                payload,
                self.backend.clone(),
            ),
        }))
    }
}

/// Submits test runs.
///
/// Triggered by a build completion, the run covers only the finished
/// build's chroot, and only when it succeeded.
pub struct TestingFarmHandler {
    ctx: JobContext,
}

#[async_trait]
impl JobHandler for TestingFarmHandler {
    fn id(&self) -> &HandlerId {
        self.ctx.handler()
    }

    #[instrument(skip_all, fields(handler = TESTING_FARM))]
    async fn run(&mut self) -> Result<ExecutionResult, HandlerError> {
        let mut targets = self.ctx.tests_targets();

        if let EventPayload::CoprBuild { chroot, status, .. } = &self.ctx.event().payload {
            if *status != CoprBuildStatus::Succeeded {
                debug!(chroot = %chroot, ?status, "Build did not succeed, no tests to run");
                return Ok(ExecutionResult::success(format!(
                    "Build for {chroot} did not succeed, tests not submitted"
                )));
            }
            targets.retain(|t| t == chroot);
            if targets.is_empty() {
                return Ok(ExecutionResult::success(format!(
                    "No test target configured for {chroot}"
                )));
            }
        }

        if targets.is_empty() {
            return Err(HandlerError::permanent("No test targets to submit"));
        }

        info!(targets = ?targets, "Submitting Testing Farm run");
        let receipt = self
            .ctx
            .submit(BackendRequest::TestingFarmRun {
                targets: targets.clone(),
            })
            .await?;
        Ok(ExecutionResult::success(format!(
            "Testing Farm run submitted for {} target(s)",
            targets.len()
        ))
        .with_detail("pipeline_reference", receipt.reference))
    }

    fn tags(&self) -> BTreeMap<&'static str, String> {
        self.ctx.tags()
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

pub struct TestingFarmResultsFactory {
    backend: Arc<dyn Backend>,
}

impl TestingFarmResultsFactory {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

impl HandlerFactory for TestingFarmResultsFactory {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor::new(
            HandlerId::from_static(TESTING_FARM_RESULTS),
            TaskName::from_static(TESTING_FARM_RESULTS_TASK),
        )
        .configured_as(JobType::Tests)
        .reacts_to(EventKind::TestingFarmResult)
    }

    fn build(&self, payload: &TaskPayload) -> Result<Box<dyn JobHandler>, HandlerError> {
        Ok(Box::new(TestingFarmResultsHandler {
            ctx: JobContext::new(
                HandlerId::from_static(TESTING_FARM_RESULTS),
                payload,
                self.backend.clone(),
            ),
        }))
    }
}

pub struct TestingFarmResultsHandler {
    ctx: JobContext,
}

#[async_trait]
impl JobHandler for TestingFarmResultsHandler {
    fn id(&self) -> &HandlerId {
        self.ctx.handler()
    }

    #[instrument(skip_all, fields(handler = TESTING_FARM_RESULTS))]
    async fn run(&mut self) -> Result<ExecutionResult, HandlerError> {
        let EventPayload::TestingFarmResult {
            pipeline_id,
            outcome,
        } = &self.ctx.event().payload
        else {
            return Err(HandlerError::permanent(
                "Testing Farm results handler received a non-result event",
            ));
        };

        self.ctx
            .submit(BackendRequest::TestingFarmReport {
                pipeline_id: pipeline_id.clone(),
                outcome: *outcome,
            })
            .await?;

        let summary = match outcome {
            TestingFarmOutcome::Passed => "passed",
            TestingFarmOutcome::Failed => "failed",
            TestingFarmOutcome::Error => "errored",
        };
        Ok(
            ExecutionResult::success(format!("Testing Farm pipeline {pipeline_id} {summary}"))
                .with_detail("pipeline_id", pipeline_id.clone()),
        )
    }

    fn tags(&self) -> BTreeMap<&'static str, String> {
        self.ctx.tags()
    }
}
