//! State every handler instance carries.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dispatch::{
    Event, EventPayload, GitRef, HandlerError, HandlerId, JobConfig, ProjectRef, TaskPayload,
};

use crate::backend::{Backend, BackendReceipt, BackendRequest};

/// The task payload a handler was built for, plus the backend it submits to.
pub struct JobContext {
    handler: HandlerId,
    payload: TaskPayload,
    backend: Arc<dyn Backend>,
}

impl JobContext {
    pub fn new(handler: HandlerId, payload: &TaskPayload, backend: Arc<dyn Backend>) -> Self {
        Self {
            handler,
            payload: payload.clone(),
            backend,
        }
    }

    pub fn handler(&self) -> &HandlerId {
        &self.handler
    }

    pub fn event(&self) -> &Event {
        &self.payload.event
    }

    pub fn project(&self) -> &ProjectRef {
        &self.payload.event.project
    }

    pub fn job_config(&self) -> Option<&JobConfig> {
        self.payload.job_config.as_ref()
    }

    /// Build targets: the re-run check's target, else the configured ones.
    pub fn build_targets(&self) -> BTreeSet<String> {
        self.event()
            .target_overrides()
            .build_targets
            .unwrap_or_else(|| self.configured_targets())
    }

    /// Test targets: the re-run check's target, else the configured ones.
    pub fn tests_targets(&self) -> BTreeSet<String> {
        self.event()
            .target_overrides()
            .tests_targets
            .unwrap_or_else(|| self.configured_targets())
    }

    /// Dist-git branches: the re-run check's branch, else the configured ones.
    pub fn branches(&self) -> BTreeSet<String> {
        self.event()
            .target_overrides()
            .branches
            .unwrap_or_else(|| {
                self.job_config()
                    .map(|job| job.dist_git_branches.iter().cloned().collect())
                    .unwrap_or_default()
            })
    }

    /// Dist-git branch the event happened on: the pushed ref or the branch a
    /// production build was made from.
    pub fn event_branch(&self) -> Option<&GitRef> {
        match &self.event().payload {
            EventPayload::Push { git_ref } => Some(git_ref),
            EventPayload::KojiBuild { branch, .. } => Some(branch),
            _ => None,
        }
    }

    /// The event's branch, when the job is configured for it.
    pub fn configured_event_branch(&self) -> Option<String> {
        let branch = self.event_branch()?.as_str().to_string();
        self.branches().contains(&branch).then_some(branch)
    }

    fn configured_targets(&self) -> BTreeSet<String> {
        self.job_config()
            .map(|job| job.targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Log context: handler, namespace, repository.
    pub fn tags(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("handler", self.handler.to_string()),
            ("namespace", self.project().namespace.to_string()),
            ("repository", self.project().repo_name.to_string()),
        ])
    }

    /// Submits `request` for this context's project.
    pub async fn submit(&self, request: BackendRequest) -> Result<BackendReceipt, HandlerError> {
        Ok(self.backend.submit(self.project(), request).await?)
    }
}
