//! Job resolution: which handlers run for an event, with which configuration.
//!
//! Resolution is a pure, synchronous computation over the registry, the event
//! and the project's package configuration:
//!
//! 1. Handlers whose event matchers match the event's kind are candidates.
//! 2. Comment events keep only handlers registered for the parsed command;
//!    check-rerun events keep only handlers registered for the check's prefix.
//! 3. Every declared job yields one unit per candidate handler configured as
//!    the job's type.
//! 4. Every declared job whose type has prerequisite handlers yields one
//!    inferred unit per prerequisite handler, unless the project declares a
//!    job of the prerequisite's own types. Each prerequisite handler is
//!    inferred at most once, borrowing the first dependent job's configuration.
//!
//! Configured units come first, in package order, then inferred units. Units
//! are dispatched independently; the order is not an execution order.

use std::collections::BTreeSet;

use tracing::{debug, instrument};

use crate::event::Event;
use crate::job::{JobConfig, PackageConfig};
use crate::registry::HandlerRegistry;
use crate::task::{DispatchUnit, UnitOrigin};
use crate::HandlerId;

/// Comment prefix that introduces a bot command.
pub const DEFAULT_COMMAND_PREFIX: &str = "/steward";

/// Resolves events into dispatch units against a registry.
#[derive(Debug, Clone)]
pub struct JobResolver<'r> {
    registry: &'r HandlerRegistry,
    command_prefix: String,
}

impl<'r> JobResolver<'r> {
    /// Creates a resolver using [`DEFAULT_COMMAND_PREFIX`].
    pub fn new(registry: &'r HandlerRegistry) -> Self {
        Self {
            registry,
            command_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
        }
    }

    /// Uses `prefix` to recognise commands in comments.
    #[must_use]
    pub fn with_command_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.command_prefix = prefix.into();
        self
    }

    /// Computes the dispatch units for `event`.
    ///
    /// An empty result means there is nothing to do; it is not an error.
    #[instrument(
        skip_all,
        fields(
            event_kind = %event.kind(),
            namespace = %event.project.namespace,
            repository = %event.project.repo_name,
        )
    )]
    pub fn resolve(&self, event: &Event, package_config: &PackageConfig) -> Vec<DispatchUnit> {
        let candidates = self.gated_handlers(event);
        if candidates.is_empty() {
            debug!("No handler reacts to this event");
            return Vec::new();
        }

        let mut units = Vec::new();

        for job in &package_config.jobs {
            let configured = self.registry.handlers_for_job_type(job.job_type);
            for handler in configured.intersection(&candidates) {
                if let Some(unit) = self.unit(handler, job, UnitOrigin::Configured) {
                    units.push(unit);
                }
            }
        }

        let mut inferred: BTreeSet<HandlerId> = BTreeSet::new();
        for job in &package_config.jobs {
            let prerequisites = self.registry.prerequisites_for(job.job_type);
            for handler in prerequisites.intersection(&candidates) {
                if inferred.contains(handler) {
                    continue;
                }
                let Some(descriptor) = self.registry.descriptor(handler) else {
                    continue;
                };
                if package_config.has_job_of_type(descriptor.configured_job_types()) {
                    continue;
                }
                let origin = UnitOrigin::Inferred {
                    dependent: job.job_type,
                };
                if let Some(unit) = self.unit(handler, job, origin) {
                    debug!(
                        handler = %handler,
                        dependent = %job.job_type,
                        "Inferring prerequisite from dependent job configuration"
                    );
                    inferred.insert(handler.clone());
                    units.push(unit);
                }
            }
        }

        debug!(units = units.len(), "Resolved dispatch units");
        units
    }

    /// Handlers reacting to the event that also pass its comment or
    /// check-rerun gate.
    fn gated_handlers(&self, event: &Event) -> BTreeSet<HandlerId> {
        let kind = event.kind();
        let reacting = self.registry.handlers_reacting_to(kind);
        if reacting.is_empty() {
            return reacting;
        }

        if kind.is_comment() {
            let Some(command) = event.comment_command(&self.command_prefix) else {
                debug!("Comment carries no command");
                return BTreeSet::new();
            };
            let gated = self.registry.handlers_for_comment(&command);
            if gated.is_empty() {
                debug!(command = %command, "No handler registered for comment command");
            }
            return reacting.intersection(&gated).cloned().collect();
        }

        if kind.is_check_rerun() {
            let Some(check) = event.check_name() else {
                return BTreeSet::new();
            };
            let gated = self.registry.handlers_for_check_prefix(check.prefix());
            if gated.is_empty() {
                debug!(check = %check, "No handler registered for check prefix");
            }
            return reacting.intersection(&gated).cloned().collect();
        }

        reacting
    }

    fn unit(
        &self,
        handler: &HandlerId,
        job: &JobConfig,
        origin: UnitOrigin,
    ) -> Option<DispatchUnit> {
        let task_name = self.registry.task_name(handler)?.clone();
        Some(DispatchUnit {
            handler: handler.clone(),
            task_name,
            job_config: job.clone(),
            origin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, EventMatcher, EventPayload, ProjectRef};
    use crate::job::{JobConfigTriggerType, JobType};
    use crate::registry::HandlerDescriptor;
    use crate::{
        CheckName, CommentId, GitRef, IssueId, ProjectUrl, PullRequestId, RepoName, RepoNamespace,
        TaskName,
    };

    fn id(s: &str) -> HandlerId {
        HandlerId::new(s).unwrap()
    }

    fn registry() -> HandlerRegistry {
        HandlerRegistry::builder()
            .register(
                HandlerDescriptor::new(id("build"), TaskName::new("task.build").unwrap())
                    .configured_as(JobType::Build)
                    .configured_as(JobType::CoprBuild)
                    .required_for(JobType::Tests)
                    .reacts_to(EventKind::PullRequest)
                    .reacts_to(EventMatcher::AnyComment)
                    .reacts_to(EventMatcher::AnyCheckRerun)
                    .run_for_comment("build")
                    .run_for_check_rerun("rpm-build"),
            )
            .register(
                HandlerDescriptor::new(id("tests"), TaskName::new("task.tests").unwrap())
                    .configured_as(JobType::Tests)
                    .reacts_to(EventKind::PullRequest)
                    .reacts_to(EventMatcher::AnyComment)
                    .reacts_to(EventMatcher::AnyCheckRerun)
                    .run_for_comment("test")
                    .run_for_check_rerun("testing-farm"),
            )
            .register(
                HandlerDescriptor::new(id("propose"), TaskName::new("task.propose").unwrap())
                    .configured_as(JobType::ProposeDownstream)
                    .reacts_to(EventKind::IssueComment)
                    .reacts_to(EventKind::Release)
                    .run_for_comment("propose-downstream"),
            )
            .build()
    }

    fn project() -> ProjectRef {
        ProjectRef::new(
            ProjectUrl::new("https://github.com/packit/ogr").unwrap(),
            RepoNamespace::new("packit").unwrap(),
            RepoName::new("ogr").unwrap(),
        )
    }

    fn pr_event() -> Event {
        Event::new(
            project(),
            EventPayload::PullRequest {
                action: crate::event::PullRequestAction::Opened,
                pr_id: PullRequestId::new(1),
                base_ref: GitRef::new("main").unwrap(),
            },
        )
    }

    fn pr_comment(body: &str) -> Event {
        Event::new(
            project(),
            EventPayload::PullRequestComment {
                pr_id: PullRequestId::new(1),
                comment_id: CommentId::new(2),
                comment: body.to_string(),
            },
        )
    }

    fn tests_job(target: &str) -> JobConfig {
        JobConfig::new(JobType::Tests, JobConfigTriggerType::PullRequest).with_targets([target])
    }

    fn handlers(units: &[DispatchUnit]) -> Vec<&str> {
        units.iter().map(|u| u.handler.as_str()).collect()
    }

    #[test]
    fn test_configured_jobs_pair_with_reacting_handlers() {
        let registry = registry();
        let config = PackageConfig::with_jobs(vec![
            JobConfig::new(JobType::CoprBuild, JobConfigTriggerType::PullRequest),
            tests_job("fedora-rawhide"),
        ]);

        let units = JobResolver::new(&registry).resolve(&pr_event(), &config);

        assert_eq!(handlers(&units), vec!["build", "tests"]);
        assert!(units.iter().all(|u| u.origin == UnitOrigin::Configured));
    }

    #[test]
    fn test_tests_only_infers_exactly_one_build() {
        let registry = registry();
        let config = PackageConfig::with_jobs(vec![
            tests_job("fedora-rawhide"),
            tests_job("fedora-39"),
            tests_job("centos-stream-9"),
        ]);

        let units = JobResolver::new(&registry).resolve(&pr_event(), &config);

        let builds: Vec<_> = units.iter().filter(|u| u.handler.as_str() == "build").collect();
        assert_eq!(builds.len(), 1);
        assert_eq!(
            builds[0].origin,
            UnitOrigin::Inferred {
                dependent: JobType::Tests
            }
        );
        assert_eq!(builds[0].job_config, config.jobs[0]);
        assert_eq!(units.iter().filter(|u| u.handler.as_str() == "tests").count(), 3);
        assert!(units.last().unwrap().is_inferred());
    }

    #[test]
    fn test_comment_without_known_command_resolves_nothing() {
        let registry = registry();
        let config = PackageConfig::with_jobs(vec![tests_job("fedora-rawhide")]);
        let resolver = JobResolver::new(&registry);

        assert!(resolver.resolve(&pr_comment("/steward frobnicate"), &config).is_empty());
        assert!(resolver.resolve(&pr_comment("looks good"), &config).is_empty());
    }

    #[test]
    fn test_comment_command_selects_gated_handler_only() {
        let registry = registry();
        let config = PackageConfig::with_jobs(vec![tests_job("fedora-rawhide")]);

        let units = JobResolver::new(&registry).resolve(&pr_comment("/steward test"), &config);
        assert_eq!(handlers(&units), vec!["tests"]);

        let units = JobResolver::new(&registry).resolve(&pr_comment("/steward build"), &config);
        assert_eq!(handlers(&units), vec!["build"]);
        assert!(units[0].is_inferred());
    }

    #[test]
    fn test_custom_command_prefix() {
        let registry = registry();
        let config = PackageConfig::with_jobs(vec![tests_job("fedora-rawhide")]);

        let units = JobResolver::new(&registry)
            .with_command_prefix("/packit")
            .resolve(&pr_comment("/packit test"), &config);
        assert_eq!(handlers(&units), vec!["tests"]);
    }

    #[test]
    fn test_check_rerun_unknown_prefix_resolves_nothing() {
        let registry = registry();
        let config = PackageConfig::with_jobs(vec![tests_job("fedora-rawhide")]);
        let event = Event::new(
            project(),
            EventPayload::CheckRerunPullRequest {
                pr_id: PullRequestId::new(1),
                check_name: CheckName::new("koji-build:f39").unwrap(),
            },
        );
        assert!(JobResolver::new(&registry).resolve(&event, &config).is_empty());
    }

    #[test]
    fn test_propose_downstream_comment_selects_propose_handler() {
        let registry = registry();
        let config = PackageConfig::with_jobs(vec![JobConfig::new(
            JobType::ProposeDownstream,
            JobConfigTriggerType::Release,
        )]);
        let event = Event::new(
            project(),
            EventPayload::IssueComment {
                issue_id: IssueId::new(4),
                comment_id: CommentId::new(5),
                comment: "/steward propose-downstream".to_string(),
                tag_name: None,
            },
        );

        let units = JobResolver::new(&registry).resolve(&event, &config);
        assert_eq!(handlers(&units), vec!["propose"]);
    }

    #[test]
    fn test_event_without_reacting_handler_resolves_nothing() {
        let registry = registry();
        let config = PackageConfig::with_jobs(vec![
            JobConfig::new(JobType::Build, JobConfigTriggerType::Commit),
            tests_job("fedora-rawhide"),
        ]);
        let event = Event::new(
            project(),
            EventPayload::Push {
                git_ref: GitRef::new("main").unwrap(),
            },
        );
        assert!(JobResolver::new(&registry).resolve(&event, &config).is_empty());
        assert!(JobResolver::new(&HandlerRegistry::default())
            .resolve(&pr_event(), &config)
            .is_empty());
    }

    #[test]
    fn test_explicit_build_suppresses_inference() {
        let registry = registry();
        let config = PackageConfig::with_jobs(vec![
            tests_job("fedora-rawhide"),
            tests_job("fedora-39"),
            JobConfig::new(JobType::Build, JobConfigTriggerType::PullRequest),
        ]);

        let units = JobResolver::new(&registry).resolve(&pr_event(), &config);

        let builds: Vec<_> = units.iter().filter(|u| u.handler.as_str() == "build").collect();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].origin, UnitOrigin::Configured);
        assert_eq!(builds[0].job_config.job_type, JobType::Build);
        assert!(units.iter().all(|u| !u.is_inferred()));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let registry = registry();
        let config = PackageConfig::with_jobs(vec![
            tests_job("fedora-rawhide"),
            tests_job("fedora-39"),
        ]);
        let event = pr_event();
        let resolver = JobResolver::new(&registry);

        assert_eq!(resolver.resolve(&event, &config), resolver.resolve(&event, &config));
    }

    #[test]
    fn test_rpm_build_rerun_selects_build_handler_only() {
        let registry = registry();
        let config = PackageConfig::with_jobs(vec![
            JobConfig::new(JobType::CoprBuild, JobConfigTriggerType::PullRequest),
            tests_job("fedora-rawhide"),
        ]);
        let event = Event::new(
            project(),
            EventPayload::CheckRerunPullRequest {
                pr_id: PullRequestId::new(1),
                check_name: CheckName::new("rpm-build:fedora-rawhide-x86_64").unwrap(),
            },
        );

        let units = JobResolver::new(&registry).resolve(&event, &config);
        assert_eq!(handlers(&units), vec!["build"]);
        assert_eq!(units[0].origin, UnitOrigin::Configured);
    }
}
