//! Pre-check predicates shared by the handlers.

use std::sync::Arc;

use dispatch::{CheckContext, Checker};
use tracing::info;

use crate::allowlist::Allowlist;

/// Skips forge events from projects that are not on the allowlist.
///
/// Build and test service events are not checked: the forge event that started
/// the build already passed.
pub struct AllowlistChecker {
    allowlist: Arc<Allowlist>,
}

impl AllowlistChecker {
    pub fn new(allowlist: Arc<Allowlist>) -> Self {
        Self { allowlist }
    }
}

impl Checker for AllowlistChecker {
    fn name(&self) -> &'static str {
        "allowlist"
    }

    fn pre_check(&self, ctx: &CheckContext<'_>) -> bool {
        if !ctx.event.kind().is_forge_event() {
            return true;
        }
        self.allowlist.is_event_allowed(ctx.event)
    }
}

/// Skips jobs with no target to build or test.
///
/// A check re-run names its own target, which counts.
pub struct TargetsDefinedChecker;

impl Checker for TargetsDefinedChecker {
    fn name(&self) -> &'static str {
        "targets_defined"
    }

    fn pre_check(&self, ctx: &CheckContext<'_>) -> bool {
        let overrides = ctx.event.target_overrides();
        if overrides.build_targets.is_some() || overrides.tests_targets.is_some() {
            return true;
        }
        let defined = ctx.job_config.is_some_and(|job| !job.targets.is_empty());
        if !defined {
            info!("No targets configured for the job");
        }
        defined
    }
}

/// Skips downstream jobs with no dist-git branch.
pub struct BranchesDefinedChecker;

impl Checker for BranchesDefinedChecker {
    fn name(&self) -> &'static str {
        "branches_defined"
    }

    fn pre_check(&self, ctx: &CheckContext<'_>) -> bool {
        if ctx.event.target_overrides().branches.is_some() {
            return true;
        }
        let defined = ctx
            .job_config
            .is_some_and(|job| !job.dist_git_branches.is_empty());
        if !defined {
            info!("No dist-git branches configured for the job");
        }
        defined
    }
}
