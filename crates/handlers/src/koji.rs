//! Koji handlers.
//!
//! - [`UpstreamKojiBuildFactory`] starts scratch builds of an upstream revision
//!   for any forge event (comments still need their command).
//! - [`KojiTaskReportFactory`] records state changes of those scratch tasks.
//! - [`KojiBuildFactory`] starts production builds when a configured dist-git
//!   branch is pushed.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dispatch::{
    Checker, EventKind, EventMatcher, EventPayload, ExecutionResult, HandlerDescriptor,
    HandlerError, HandlerFactory, HandlerId, JobHandler, JobType, TaskName, TaskPayload,
};
use tracing::{info, instrument};

use crate::allowlist::Allowlist;
use crate::backend::{Backend, BackendRequest};
use crate::checkers::{AllowlistChecker, BranchesDefinedChecker, TargetsDefinedChecker};
use crate::context::JobContext;

pub const UPSTREAM_KOJI_BUILD: &str = "upstream_koji_build";
pub const UPSTREAM_KOJI_BUILD_TASK: &str = "task.run_koji_build_handler";
pub const UPSTREAM_KOJI_BUILD_REPORT: &str = "upstream_koji_build_report";
pub const UPSTREAM_KOJI_BUILD_REPORT_TASK: &str = "task.run_koji_build_report_handler";
pub const KOJI_BUILD: &str = "koji_build";
pub const KOJI_BUILD_TASK: &str = "task.run_downstream_koji_build_handler";

// ---------------------------------------------------------------------------
// Upstream scratch build
// ---------------------------------------------------------------------------

pub struct UpstreamKojiBuildFactory {
    backend: Arc<dyn Backend>,
    allowlist: Arc<Allowlist>,
}

impl UpstreamKojiBuildFactory {
    pub fn new(backend: Arc<dyn Backend>, allowlist: Arc<Allowlist>) -> Self {
        Self { backend, allowlist }
    }
}

impl HandlerFactory for UpstreamKojiBuildFactory {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor::new(
            HandlerId::from_static(UPSTREAM_KOJI_BUILD),
            TaskName::from_static(UPSTREAM_KOJI_BUILD_TASK),
        )
        .configured_as(JobType::UpstreamKojiBuild)
        .reacts_to(EventMatcher::AnyForgeEvent)
        .run_for_comment("production-build")
        .run_for_comment("upstream-koji-build")
    }

    fn checkers(&self) -> Vec<Box<dyn Checker>> {
        vec![
            Box::new(AllowlistChecker::new(self.allowlist.clone())),
            Box::new(TargetsDefinedChecker),
        ]
    }

    fn build(&self, payload: &TaskPayload) -> Result<Box<dyn JobHandler>, HandlerError> {
        Ok(Box::new(UpstreamKojiBuildHandler {
            ctx: JobContext::new(
                HandlerId::from_static(UPSTREAM_KOJI_BUILD),
                payload,
                self.backend.clone(),
            ),
        }))
    }
}

pub struct UpstreamKojiBuildHandler {
    ctx: JobContext,
}

#[async_trait]
impl JobHandler for UpstreamKojiBuildHandler {
    fn id(&self) -> &HandlerId {
        self.ctx.handler()
    }

    #[instrument(skip_all, fields(handler = UPSTREAM_KOJI_BUILD))]
    async fn run(&mut self) -> Result<ExecutionResult, HandlerError> {
        let targets = self.ctx.build_targets();
        if targets.is_empty() {
            return Err(HandlerError::permanent("No Koji targets to submit"));
        }
        info!(targets = ?targets, "Submitting Koji scratch build");
        let receipt = self
            .ctx
            .submit(BackendRequest::KojiScratchBuild {
                targets: targets.clone(),
            })
            .await?;
        Ok(ExecutionResult::success(format!(
            "Koji scratch build submitted for {} target(s)",
            targets.len()
        ))
        .with_detail("task_reference", receipt.reference))
    }

    fn tags(&self) -> BTreeMap<&'static str, String> {
        self.ctx.tags()
    }
}

// ---------------------------------------------------------------------------
// Scratch task report
// ---------------------------------------------------------------------------

pub struct KojiTaskReportFactory {
    backend: Arc<dyn Backend>,
}

impl KojiTaskReportFactory {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

impl HandlerFactory for KojiTaskReportFactory {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor::new(
            HandlerId::from_static(UPSTREAM_KOJI_BUILD_REPORT),
            TaskName::from_static(UPSTREAM_KOJI_BUILD_REPORT_TASK),
        )
        .configured_as(JobType::UpstreamKojiBuild)
        .reacts_to(EventKind::KojiTask)
    }

    fn build(&self, payload: &TaskPayload) -> Result<Box<dyn JobHandler>, HandlerError> {
        Ok(Box::new(KojiTaskReportHandler {
            ctx: JobContext::new(
                HandlerId::from_static(UPSTREAM_KOJI_BUILD_REPORT),
                payload,
                self.backend.clone(),
            ),
        }))
    }
}

pub struct KojiTaskReportHandler {
    ctx: JobContext,
}

#[async_trait]
impl JobHandler for KojiTaskReportHandler {
    fn id(&self) -> &HandlerId {
        self.ctx.handler()
    }

    #[instrument(skip_all, fields(handler = UPSTREAM_KOJI_BUILD_REPORT))]
    async fn run(&mut self) -> Result<ExecutionResult, HandlerError> {
        let EventPayload::KojiTask { task_id, state } = &self.ctx.event().payload else {
            return Err(HandlerError::permanent(
                "Koji task report handler received a non-task event",
            ));
        };
        let (task_id, state) = (*task_id, *state);

        self.ctx
            .submit(BackendRequest::KojiTaskReport { task_id, state })
            .await?;

        Ok(
            ExecutionResult::success(format!("Koji task {task_id} reported as {state:?}"))
                .with_detail("task_id", task_id)
                .with_detail("finished", state.is_finished()),
        )
    }

    fn tags(&self) -> BTreeMap<&'static str, String> {
        self.ctx.tags()
    }
}

// ---------------------------------------------------------------------------
// Production build from dist-git
// ---------------------------------------------------------------------------

pub struct KojiBuildFactory {
    backend: Arc<dyn Backend>,
}

impl KojiBuildFactory {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

impl HandlerFactory for KojiBuildFactory {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor::new(
            HandlerId::from_static(KOJI_BUILD),
            TaskName::from_static(KOJI_BUILD_TASK),
        )
        .configured_as(JobType::KojiBuild)
        .reacts_to(EventKind::Push)
    }

    fn checkers(&self) -> Vec<Box<dyn Checker>> {
        vec![Box::new(BranchesDefinedChecker)]
    }

    fn build(&self, payload: &TaskPayload) -> Result<Box<dyn JobHandler>, HandlerError> {
        Ok(Box::new(KojiBuildHandler {
            ctx: JobContext::new(
                HandlerId::from_static(KOJI_BUILD),
                payload,
                self.backend.clone(),
            ),
        }))
    }
}

pub struct KojiBuildHandler {
    ctx: JobContext,
}

#[async_trait]
impl JobHandler for KojiBuildHandler {
    fn id(&self) -> &HandlerId {
        self.ctx.handler()
    }

    /// Pushes to branches the job does not list are acknowledged and ignored.
    #[instrument(skip_all, fields(handler = KOJI_BUILD))]
    async fn run(&mut self) -> Result<ExecutionResult, HandlerError> {
        let Some(pushed) = self.ctx.event_branch().cloned() else {
            return Err(HandlerError::permanent(
                "Koji build handler received an event without a branch",
            ));
        };
        let Some(branch) = self.ctx.configured_event_branch() else {
            info!(branch = %pushed, "Branch is not configured for Koji builds");
            return Ok(ExecutionResult::success(format!(
                "Branch {pushed} is not configured for Koji builds"
            )));
        };

        let receipt = self
            .ctx
            .submit(BackendRequest::KojiBuild {
                branch: branch.clone(),
            })
            .await?;
        Ok(
            ExecutionResult::success(format!("Koji build submitted for {branch}"))
                .with_detail("build_reference", receipt.reference),
        )
    }

    fn tags(&self) -> BTreeMap<&'static str, String> {
        self.ctx.tags()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, BackendReceipt};
    use dispatch::event::KojiTaskState;
    use dispatch::{
        Event, GitRef, JobConfig, JobConfigTriggerType, PackageConfig, ProjectRef, ProjectUrl,
        RepoName, RepoNamespace,
    };
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        requests: Mutex<Vec<BackendRequest>>,
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        async fn submit(
            &self,
            _project: &ProjectRef,
            request: BackendRequest,
        ) -> Result<BackendReceipt, BackendError> {
            self.requests.lock().unwrap().push(request);
            Ok(BackendReceipt {
                reference: "koji-1".into(),
            })
        }
    }

    fn payload(job: JobConfig, event: EventPayload) -> TaskPayload {
        TaskPayload {
            package_config: PackageConfig::with_jobs(vec![job.clone()]),
            job_config: Some(job),
            event: Event::new(
                ProjectRef::new(
                    ProjectUrl::new("https://src.fedoraproject.org/rpms/python-ogr").unwrap(),
                    RepoNamespace::new("rpms").unwrap(),
                    RepoName::new("python-ogr").unwrap(),
                ),
                event,
            ),
        }
    }

    fn push(branch: &str) -> EventPayload {
        EventPayload::Push {
            git_ref: GitRef::new(branch).unwrap(),
        }
    }

    fn koji_build_job() -> JobConfig {
        JobConfig::new(JobType::KojiBuild, JobConfigTriggerType::Commit)
            .with_dist_git_branches(["f40", "rawhide"])
    }

    #[tokio::test]
    async fn test_task_report_submits_state() {
        let backend = Arc::new(RecordingBackend::default());
        let factory = KojiTaskReportFactory::new(backend.clone());
        let job = JobConfig::new(JobType::UpstreamKojiBuild, JobConfigTriggerType::PullRequest);
        let payload = payload(
            job,
            EventPayload::KojiTask {
                task_id: 116_000_001,
                state: KojiTaskState::Closed,
            },
        );

        let result = factory.build(&payload).unwrap().run().await.unwrap();

        assert!(result.success);
        assert_eq!(result.msg(), Some("Koji task 116000001 reported as Closed"));
        assert_eq!(
            *backend.requests.lock().unwrap(),
            vec![BackendRequest::KojiTaskReport {
                task_id: 116_000_001,
                state: KojiTaskState::Closed,
            }]
        );
    }

    #[tokio::test]
    async fn test_production_build_for_configured_branch() {
        let backend = Arc::new(RecordingBackend::default());
        let factory = KojiBuildFactory::new(backend.clone());

        let result = factory
            .build(&payload(koji_build_job(), push("rawhide")))
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(result.msg(), Some("Koji build submitted for rawhide"));
        assert_eq!(
            *backend.requests.lock().unwrap(),
            vec![BackendRequest::KojiBuild {
                branch: "rawhide".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_push_to_other_branch_builds_nothing() {
        let backend = Arc::new(RecordingBackend::default());
        let factory = KojiBuildFactory::new(backend.clone());

        let result = factory
            .build(&payload(koji_build_job(), push("f38")))
            .unwrap()
            .run()
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(
            result.msg(),
            Some("Branch f38 is not configured for Koji builds")
        );
        assert!(backend.requests.lock().unwrap().is_empty());
    }
}
