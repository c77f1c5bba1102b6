//! Dispatch units and their queue representation.
//!
//! A [`DispatchUnit`] is one resolved (handler, job configuration) pair. It is
//! sent to the delivery queue as a [`TaskMessage`]: the handler's task name plus
//! a [`TaskPayload`] holding the package configuration, the job configuration
//! and the originating event. Re-deliveries carry the identical payload.

use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::job::{JobConfig, JobType, PackageConfig};
use crate::{HandlerId, TaskId, TaskName};

/// Why a dispatch unit exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum UnitOrigin {
    /// The project declared a job the handler is configured as.
    Configured,
    /// The handler is a prerequisite of a declared `dependent` job and runs
    /// with that job's configuration as a stand-in.
    Inferred {
        /// Job type whose configuration was borrowed.
        dependent: JobType,
    },
}

/// One resolved (handler, job configuration) pair; the unit of retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchUnit {
    /// Handler to run.
    pub handler: HandlerId,
    /// Queue task name of the handler.
    pub task_name: TaskName,
    /// The unit's own copy of the job configuration.
    pub job_config: JobConfig,
    /// Whether the configuration was declared for this handler or borrowed.
    pub origin: UnitOrigin,
}

impl DispatchUnit {
    /// Returns `true` for units synthesised by prerequisite inference.
    pub fn is_inferred(&self) -> bool {
        matches!(self.origin, UnitOrigin::Inferred { .. })
    }

    /// Builds the first-attempt queue message for this unit.
    pub fn into_message(self, event: &Event, package_config: &PackageConfig) -> TaskMessage {
        TaskMessage::new(
            self.task_name,
            TaskPayload {
                package_config: package_config.clone(),
                job_config: Some(self.job_config),
                event: event.clone(),
            },
        )
    }
}

/// The serialised fields every handler task receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Full package configuration of the project revision.
    pub package_config: PackageConfig,
    /// Job configuration the handler runs with.
    pub job_config: Option<JobConfig>,
    /// Originating event.
    pub event: Event,
}

/// One delivery of a handler task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Stable across re-deliveries of the same task.
    pub id: TaskId,
    /// Which handler runs the task.
    pub task_name: TaskName,
    /// Number of previous deliveries (0 on the first attempt). Supplied by the
    /// delivery infrastructure.
    #[serde(default)]
    pub attempt: u32,
    /// Retry limit requested by the previous attempt, if it overrode the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Handler input.
    pub payload: TaskPayload,
}

impl TaskMessage {
    /// Creates a first-attempt message.
    pub fn new(task_name: TaskName, payload: TaskPayload) -> Self {
        Self {
            id: TaskId::new_random(),
            task_name,
            attempt: 0,
            max_retries: None,
            payload,
        }
    }

    /// The message for the next delivery of the same task.
    ///
    /// Only the delivery metadata changes; the payload is cloned unmodified.
    pub fn redelivery(&self, max_retries: Option<u32>) -> Self {
        Self {
            id: self.id,
            task_name: self.task_name.clone(),
            attempt: self.attempt.saturating_add(1),
            max_retries: max_retries.or(self.max_retries),
            payload: self.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventPayload, ProjectRef};
    use crate::job::JobConfigTriggerType;
    use crate::{ProjectUrl, RepoName, RepoNamespace, TagName};

    fn message() -> TaskMessage {
        let event = Event::new(
            ProjectRef::new(
                ProjectUrl::new("https://github.com/packit/ogr").unwrap(),
                RepoNamespace::new("packit").unwrap(),
                RepoName::new("ogr").unwrap(),
            ),
            EventPayload::Release {
                tag_name: TagName::new("1.0.0").unwrap(),
            },
        );
        let job = JobConfig::new(JobType::ProposeDownstream, JobConfigTriggerType::Release)
            .with_dist_git_branches(["main"]);
        let unit = DispatchUnit {
            handler: HandlerId::new("propose_downstream").unwrap(),
            task_name: TaskName::new("task.run_propose_downstream_handler").unwrap(),
            job_config: job.clone(),
            origin: UnitOrigin::Configured,
        };
        unit.into_message(&event, &PackageConfig::with_jobs(vec![job]))
    }

    #[test]
    fn test_redelivery_keeps_payload_and_identity() {
        let first = message();
        let second = first.redelivery(None);

        assert_eq!(second.id, first.id);
        assert_eq!(second.attempt, 1);
        assert_eq!(second.payload, first.payload);
        assert_eq!(second.task_name, first.task_name);
    }

    #[test]
    fn test_redelivery_carries_max_retries_override() {
        let second = message().redelivery(Some(5));
        assert_eq!(second.max_retries, Some(5));
        assert_eq!(second.redelivery(None).max_retries, Some(5));
    }

    #[test]
    fn test_message_survives_the_wire() {
        let first = message();
        let json = serde_json::to_string(&first).unwrap();
        let back: TaskMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, first);
    }
}
