//! Project-declared job configuration.
//!
//! A project's [`PackageConfig`] is loaded once per event by an external
//! collaborator and handed to the resolver read-only. Nothing in this crate
//! mutates it; dispatch units receive their own copy of the [`JobConfig`] they
//! run with.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ProjectUrl;

/// Category of declared automation work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Generic RPM build (served by the Copr build handler).
    Build,
    /// Explicit Copr build.
    CoprBuild,
    /// Test run; requires a build of the same revision.
    Tests,
    /// Propose a new upstream release to the downstream distribution repository.
    ProposeDownstream,
    /// Scratch build in Koji for an upstream revision.
    UpstreamKojiBuild,
    /// Production Koji build from dist-git.
    KojiBuild,
    /// Bodhi update creation.
    BodhiUpdate,
    /// Sync downstream changes back upstream.
    SyncFromDownstream,
}

impl JobType {
    /// Every job type.
    pub const ALL: [JobType; 8] = [
        JobType::Build,
        JobType::CoprBuild,
        JobType::Tests,
        JobType::ProposeDownstream,
        JobType::UpstreamKojiBuild,
        JobType::KojiBuild,
        JobType::BodhiUpdate,
        JobType::SyncFromDownstream,
    ];

    /// The configuration-file name of this job type.
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Build => "build",
            JobType::CoprBuild => "copr_build",
            JobType::Tests => "tests",
            JobType::ProposeDownstream => "propose_downstream",
            JobType::UpstreamKojiBuild => "upstream_koji_build",
            JobType::KojiBuild => "koji_build",
            JobType::BodhiUpdate => "bodhi_update",
            JobType::SyncFromDownstream => "sync_from_downstream",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of repository activity a job configuration is declared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobConfigTriggerType {
    /// Pull/merge request activity.
    PullRequest,
    /// Pushes to a branch.
    Commit,
    /// Published releases.
    Release,
}

/// One project-declared unit of automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Which job this is.
    #[serde(rename = "job")]
    pub job_type: JobType,

    /// Which repository activity activates it.
    pub trigger: JobConfigTriggerType,

    /// Build or test target matrix (e.g. `"fedora-rawhide-x86_64"`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,

    /// Dist-git branches for downstream jobs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dist_git_branches: Vec<String>,

    /// Job-type-specific options, passed through untouched.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl JobConfig {
    /// Creates a job configuration with no targets, branches or options.
    pub fn new(job_type: JobType, trigger: JobConfigTriggerType) -> Self {
        Self {
            job_type,
            trigger,
            targets: Vec::new(),
            dist_git_branches: Vec::new(),
            options: serde_json::Map::new(),
        }
    }

    /// Sets the target matrix.
    #[must_use]
    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the dist-git branches.
    #[must_use]
    pub fn with_dist_git_branches<I, S>(mut self, branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dist_git_branches = branches.into_iter().map(Into::into).collect();
        self
    }

    /// Adds one type-specific option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

/// Ordered collection of job configurations for one project revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageConfig {
    /// Name of the package in the downstream distribution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downstream_package_name: Option<String>,

    /// Upstream project the configuration was loaded from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_project_url: Option<ProjectUrl>,

    /// Declared jobs, in file order.
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl PackageConfig {
    /// Creates a package configuration holding `jobs`.
    pub fn with_jobs(jobs: Vec<JobConfig>) -> Self {
        Self {
            jobs,
            ..Self::default()
        }
    }

    /// Returns `true` if any declared job has a type in `job_types`.
    pub fn has_job_of_type(&self, job_types: &BTreeSet<JobType>) -> bool {
        self.jobs.iter().any(|job| job_types.contains(&job.job_type))
    }

    /// Returns a copy containing only the jobs declared for `trigger`.
    pub fn jobs_for_trigger(&self, trigger: JobConfigTriggerType) -> PackageConfig {
        PackageConfig {
            downstream_package_name: self.downstream_package_name.clone(),
            upstream_project_url: self.upstream_project_url.clone(),
            jobs: self
                .jobs
                .iter()
                .filter(|job| job.trigger == trigger)
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_config_deserializes_from_project_file_shape() {
        let job: JobConfig = serde_json::from_value(json!({
            "job": "copr_build",
            "trigger": "pull_request",
            "targets": ["fedora-rawhide-x86_64"],
            "options": { "preserve_project": true }
        }))
        .unwrap();

        assert_eq!(job.job_type, JobType::CoprBuild);
        assert_eq!(job.trigger, JobConfigTriggerType::PullRequest);
        assert_eq!(job.targets, vec!["fedora-rawhide-x86_64".to_string()]);
        assert!(job.dist_git_branches.is_empty());
        assert_eq!(job.options["preserve_project"], json!(true));
    }

    #[test]
    fn test_jobs_for_trigger_keeps_order() {
        let config = PackageConfig::with_jobs(vec![
            JobConfig::new(JobType::Tests, JobConfigTriggerType::PullRequest),
            JobConfig::new(JobType::ProposeDownstream, JobConfigTriggerType::Release),
            JobConfig::new(JobType::CoprBuild, JobConfigTriggerType::PullRequest),
        ]);

        let pr_jobs = config.jobs_for_trigger(JobConfigTriggerType::PullRequest);
        let types: Vec<_> = pr_jobs.jobs.iter().map(|j| j.job_type).collect();
        assert_eq!(types, vec![JobType::Tests, JobType::CoprBuild]);
        assert_eq!(config.jobs.len(), 3);
    }

    #[test]
    fn test_has_job_of_type() {
        let config = PackageConfig::with_jobs(vec![JobConfig::new(
            JobType::Tests,
            JobConfigTriggerType::PullRequest,
        )]);
        let builds = BTreeSet::from([JobType::Build, JobType::CoprBuild]);
        assert!(!config.has_job_of_type(&builds));
        assert!(config.has_job_of_type(&BTreeSet::from([JobType::Tests])));
    }
}
