//! Handler run results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::job::JobConfig;
use crate::types::Timestamp;
use crate::TaskName;

/// Detail key holding the human-readable result message.
pub const MSG_DETAIL: &str = "msg";

/// Outcome of one handler run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the run achieved what it was asked to do.
    pub success: bool,
    /// Free-form details; `msg` carries the summary.
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl ExecutionResult {
    /// A successful result with summary `msg`.
    pub fn success(msg: impl Into<String>) -> Self {
        Self::with_msg(true, msg.into())
    }

    /// A failed result with summary `msg`.
    pub fn failure(msg: impl Into<String>) -> Self {
        Self::with_msg(false, msg.into())
    }

    fn with_msg(success: bool, msg: String) -> Self {
        let mut details = Map::new();
        details.insert(MSG_DETAIL.to_string(), Value::String(msg));
        Self { success, details }
    }

    /// Adds a detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// The summary message, if present.
    pub fn msg(&self) -> Option<&str> {
        self.details.get(MSG_DETAIL).and_then(Value::as_str)
    }
}

/// Key under which a run's result is reported: `"{job_type}-{timestamp}"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultKey(String);

impl ResultKey {
    /// Key for a run of `job_config` (or of `task_name` when the unit has no
    /// job configuration) finishing at `at`.
    pub fn new(job_config: Option<&JobConfig>, task_name: &TaskName, at: Timestamp) -> Self {
        let label = match job_config {
            Some(job) => job.job_type.as_str().to_string(),
            None => task_name.as_str().to_string(),
        };
        Self(format!("{label}-{}", at.result_key_format()))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result mapping exposed to the caller after a task finishes.
pub type JobResults = BTreeMap<ResultKey, ExecutionResult>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobConfigTriggerType, JobType};

    #[test]
    fn test_msg_accessor() {
        let result = ExecutionResult::failure("Copr is down").with_detail("build_id", 42);
        assert!(!result.success);
        assert_eq!(result.msg(), Some("Copr is down"));
        assert_eq!(result.details["build_id"], Value::from(42));
    }

    #[test]
    fn test_result_key_uses_job_type_or_task_name() {
        let at = Timestamp::from_unix_seconds(1_700_000_000).unwrap();
        let task = TaskName::new("task.run_copr_build_handler").unwrap();
        let job = JobConfig::new(JobType::CoprBuild, JobConfigTriggerType::PullRequest);

        assert_eq!(
            ResultKey::new(Some(&job), &task, at).as_str(),
            "copr_build-2023-11-14T22:13:20.000000"
        );
        assert_eq!(
            ResultKey::new(None, &task, at).as_str(),
            "task.run_copr_build_handler-2023-11-14T22:13:20.000000"
        );
    }
}
