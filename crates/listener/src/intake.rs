//! Event intake: from an accepted event to submitted tasks.

use std::sync::Arc;
use std::time::Duration;

use dispatch::{
    DispatchError, DispatchUnit, Event, HandlerRegistry, JobResolver, PackageConfig,
    TaskMessage, TaskQueue, Timestamp, DEFAULT_COMMAND_PREFIX,
};
use tracing::{info, instrument};

/// Resolves events and submits one task per dispatch unit.
///
/// Borrows the registry; the binary passes the process-wide one from
/// [`HandlerRegistry::install`].
pub struct EventIntake<'r> {
    registry: &'r HandlerRegistry,
    queue: Arc<dyn TaskQueue>,
    command_prefix: String,
}

impl<'r> EventIntake<'r> {
    pub fn new(registry: &'r HandlerRegistry, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            registry,
            queue,
            command_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
        }
    }

    pub fn with_command_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.command_prefix = prefix.into();
        self
    }

    /// Computes the dispatch units for `event` without submitting anything.
    pub fn resolve(&self, event: &Event, package_config: &PackageConfig) -> Vec<DispatchUnit> {
        self.resolver().resolve(event, &jobs_for_event(event, package_config))
    }

    /// Resolves `event` and submits the resulting tasks for immediate delivery.
    ///
    /// Returns the submitted messages in resolution order.
    #[instrument(
        skip_all,
        fields(event_kind = %event.kind(), namespace = %event.project.namespace, repository = %event.project.repo_name)
    )]
    pub async fn process(
        &self,
        event: &Event,
        package_config: &PackageConfig,
    ) -> Result<Vec<TaskMessage>, DispatchError> {
        let mut event = event.clone();
        event
            .task_accepted_time
            .get_or_insert_with(|| Timestamp::now().truncated_to_seconds());

        let package_config = jobs_for_event(&event, package_config);
        let units = self.resolver().resolve(&event, &package_config);
        if units.is_empty() {
            info!("No handler matched the event");
            return Ok(Vec::new());
        }

        let mut submitted = Vec::with_capacity(units.len());
        for unit in units {
            let inferred = unit.is_inferred();
            let message = unit.into_message(&event, &package_config);
            info!(
                task_id = %message.id,
                task_name = %message.task_name,
                inferred,
                "Submitting task"
            );
            self.queue.submit(message.clone(), Duration::ZERO).await?;
            submitted.push(message);
        }
        Ok(submitted)
    }

    fn resolver(&self) -> JobResolver<'_> {
        JobResolver::new(self.registry).with_command_prefix(self.command_prefix.clone())
    }
}

/// Forge events only see the jobs declared for their trigger; service events
/// (build and test results) see the whole configuration.
fn jobs_for_event(event: &Event, package_config: &PackageConfig) -> PackageConfig {
    match event.job_config_trigger() {
        Some(trigger) => package_config.jobs_for_trigger(trigger),
        None => package_config.clone(),
    }
}
