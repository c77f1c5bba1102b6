//! Inbound repository events.
//!
//! An [`Event`] is a common header (which project, which commit, who) plus a
//! tagged [`EventPayload`]. Handlers declare what they react to with an
//! [`EventMatcher`], which matches either one concrete [`EventKind`] or a whole
//! class of kinds (every comment kind, every check-rerun kind).
//!
//! Events travel on the task queue as JSON with an `event_type` tag, so a
//! worker on another node reconstructs exactly the event the resolver saw.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::job::JobConfigTriggerType;
use crate::types::Timestamp;
use crate::{
    ActorLogin, CheckName, CommentId, CommitSha, GitRef, IssueId, ProjectUrl, PullRequestId,
    RepoName, RepoNamespace, TagName,
};

/// Check-rerun prefix of build checks.
pub const BUILD_CHECK_PREFIX: &str = "rpm-build";
/// Check-rerun prefix of test checks.
pub const TESTS_CHECK_PREFIX: &str = "testing-farm";
/// Check-rerun prefix of propose-downstream checks.
pub const PROPOSE_DOWNSTREAM_CHECK_PREFIX: &str = "propose-downstream";

// ---------------------------------------------------------------------------
// Project coordinates
// ---------------------------------------------------------------------------

/// Where an event originated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    /// Web URL of the project.
    pub project_url: ProjectUrl,
    /// Repository namespace (may contain `/` for nested groups).
    pub namespace: RepoNamespace,
    /// Repository name.
    pub repo_name: RepoName,
}

impl ProjectRef {
    /// Creates project coordinates.
    pub fn new(project_url: ProjectUrl, namespace: RepoNamespace, repo_name: RepoName) -> Self {
        Self {
            project_url,
            namespace,
            repo_name,
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// What happened to a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    Opened,
    Reopened,
    Synchronize,
}

/// Lifecycle point reported by the Copr build service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoprBuildStatus {
    Started,
    Succeeded,
    Failed,
}

/// Overall outcome reported by Testing Farm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestingFarmOutcome {
    Passed,
    Failed,
    Error,
}

/// State of a Koji task or build, as reported by the Koji message bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KojiTaskState {
    Open,
    Closed,
    Failed,
    Canceled,
}

impl KojiTaskState {
    /// `true` once Koji will not report on the task again.
    pub fn is_finished(self) -> bool {
        !matches!(self, KojiTaskState::Open)
    }
}

/// Kind-specific event data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    PullRequest {
        action: PullRequestAction,
        pr_id: PullRequestId,
        base_ref: GitRef,
    },
    PullRequestComment {
        pr_id: PullRequestId,
        comment_id: CommentId,
        comment: String,
    },
    IssueComment {
        issue_id: IssueId,
        comment_id: CommentId,
        comment: String,
        /// Release the comment acts on (the latest release when resolved).
        #[serde(default)]
        tag_name: Option<TagName>,
    },
    Push {
        git_ref: GitRef,
    },
    Release {
        tag_name: TagName,
    },
    CheckRerunPullRequest {
        pr_id: PullRequestId,
        check_name: CheckName,
    },
    CheckRerunCommit {
        git_ref: GitRef,
        check_name: CheckName,
    },
    CheckRerunRelease {
        tag_name: TagName,
        check_name: CheckName,
    },
    CoprBuild {
        build_id: u64,
        chroot: String,
        status: CoprBuildStatus,
    },
    TestingFarmResult {
        pipeline_id: String,
        outcome: TestingFarmOutcome,
    },
    /// State change of an upstream scratch-build task.
    KojiTask {
        task_id: u64,
        state: KojiTaskState,
    },
    /// State change of a production build made from a dist-git branch.
    KojiBuild {
        build_id: u64,
        nvr: String,
        branch: GitRef,
        state: KojiTaskState,
    },
}

impl EventPayload {
    /// The fieldless tag of this payload.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::PullRequest { .. } => EventKind::PullRequest,
            EventPayload::PullRequestComment { .. } => EventKind::PullRequestComment,
            EventPayload::IssueComment { .. } => EventKind::IssueComment,
            EventPayload::Push { .. } => EventKind::Push,
            EventPayload::Release { .. } => EventKind::Release,
            EventPayload::CheckRerunPullRequest { .. } => EventKind::CheckRerunPullRequest,
            EventPayload::CheckRerunCommit { .. } => EventKind::CheckRerunCommit,
            EventPayload::CheckRerunRelease { .. } => EventKind::CheckRerunRelease,
            EventPayload::CoprBuild { .. } => EventKind::CoprBuild,
            EventPayload::TestingFarmResult { .. } => EventKind::TestingFarmResult,
            EventPayload::KojiTask { .. } => EventKind::KojiTask,
            EventPayload::KojiBuild { .. } => EventKind::KojiBuild,
        }
    }
}

// ---------------------------------------------------------------------------
// Kinds and matchers
// ---------------------------------------------------------------------------

/// Concrete event kind, used for registry matching and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PullRequest,
    PullRequestComment,
    IssueComment,
    Push,
    Release,
    CheckRerunPullRequest,
    CheckRerunCommit,
    CheckRerunRelease,
    CoprBuild,
    TestingFarmResult,
    KojiTask,
    KojiBuild,
}

impl EventKind {
    /// Every concrete kind.
    pub const ALL: [EventKind; 12] = [
        EventKind::PullRequest,
        EventKind::PullRequestComment,
        EventKind::IssueComment,
        EventKind::Push,
        EventKind::Release,
        EventKind::CheckRerunPullRequest,
        EventKind::CheckRerunCommit,
        EventKind::CheckRerunRelease,
        EventKind::CoprBuild,
        EventKind::TestingFarmResult,
        EventKind::KojiTask,
        EventKind::KojiBuild,
    ];

    /// Comment kinds are gated by the parsed comment command.
    pub fn is_comment(self) -> bool {
        matches!(self, EventKind::PullRequestComment | EventKind::IssueComment)
    }

    /// Check-rerun kinds are gated by the re-run check's prefix.
    pub fn is_check_rerun(self) -> bool {
        matches!(
            self,
            EventKind::CheckRerunPullRequest
                | EventKind::CheckRerunCommit
                | EventKind::CheckRerunRelease
        )
    }

    /// Kinds that originate on the git forge (as opposed to build/test services).
    pub fn is_forge_event(self) -> bool {
        !matches!(
            self,
            EventKind::CoprBuild
                | EventKind::TestingFarmResult
                | EventKind::KojiTask
                | EventKind::KojiBuild
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// What a handler reacts to: one concrete kind or a class of kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventMatcher {
    /// Exactly this kind.
    Kind(EventKind),
    /// Any comment kind.
    AnyComment,
    /// Any check-rerun kind.
    AnyCheckRerun,
    /// Any kind that originates on the forge.
    AnyForgeEvent,
}

impl EventMatcher {
    /// Returns `true` if `kind` belongs to this matcher.
    pub fn matches(self, kind: EventKind) -> bool {
        match self {
            EventMatcher::Kind(k) => k == kind,
            EventMatcher::AnyComment => kind.is_comment(),
            EventMatcher::AnyCheckRerun => kind.is_check_rerun(),
            EventMatcher::AnyForgeEvent => kind.is_forge_event(),
        }
    }
}

impl From<EventKind> for EventMatcher {
    fn from(kind: EventKind) -> Self {
        EventMatcher::Kind(kind)
    }
}

// ---------------------------------------------------------------------------
// Target overrides
// ---------------------------------------------------------------------------

/// Narrowing of a job's target matrix requested by the event itself
/// (a re-run of one check re-runs only that check's target).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetOverrides {
    /// Build targets to use instead of the configured ones.
    pub build_targets: Option<BTreeSet<String>>,
    /// Test targets to use instead of the configured ones.
    pub tests_targets: Option<BTreeSet<String>>,
    /// Dist-git branches to use instead of the configured ones.
    pub branches: Option<BTreeSet<String>>,
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// An inbound repository or service event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Originating project.
    pub project: ProjectRef,

    /// Account that caused the event, when known.
    #[serde(default)]
    pub actor: Option<ActorLogin>,

    /// Commit the event concerns, when known.
    #[serde(default)]
    pub commit_sha: Option<CommitSha>,

    /// When the event was created.
    pub created_at: Timestamp,

    /// When the service accepted the event for processing.
    #[serde(default)]
    pub task_accepted_time: Option<Timestamp>,

    /// Kind-specific data, tagged with `event_type`.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// Creates an event created now, with no actor or commit.
    pub fn new(project: ProjectRef, payload: EventPayload) -> Self {
        Self {
            project,
            actor: None,
            commit_sha: None,
            created_at: Timestamp::now().truncated_to_seconds(),
            task_accepted_time: None,
            payload,
        }
    }

    /// Sets the actor.
    #[must_use]
    pub fn with_actor(mut self, actor: ActorLogin) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Sets the commit.
    #[must_use]
    pub fn with_commit(mut self, commit_sha: CommitSha) -> Self {
        self.commit_sha = Some(commit_sha);
        self
    }

    /// The concrete kind of this event.
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Comment body for comment kinds.
    pub fn comment(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::PullRequestComment { comment, .. }
            | EventPayload::IssueComment { comment, .. } => Some(comment),
            _ => None,
        }
    }

    /// Name of the check being re-run for check-rerun kinds.
    pub fn check_name(&self) -> Option<&CheckName> {
        match &self.payload {
            EventPayload::CheckRerunPullRequest { check_name, .. }
            | EventPayload::CheckRerunCommit { check_name, .. }
            | EventPayload::CheckRerunRelease { check_name, .. } => Some(check_name),
            _ => None,
        }
    }

    /// Pull request the event concerns, if any.
    pub fn pr_id(&self) -> Option<PullRequestId> {
        match &self.payload {
            EventPayload::PullRequest { pr_id, .. }
            | EventPayload::PullRequestComment { pr_id, .. }
            | EventPayload::CheckRerunPullRequest { pr_id, .. } => Some(*pr_id),
            _ => None,
        }
    }

    /// Parses the bot command out of a comment body.
    ///
    /// The command is the first word following `prefix` on the first line that
    /// starts with `prefix` (leading whitespace ignored). The prefix must be
    /// followed by whitespace; `"/stewardbuild"` is not a command.
    pub fn comment_command(&self, prefix: &str) -> Option<String> {
        let comment = self.comment()?;
        comment.lines().find_map(|line| {
            let rest = line.trim_start().strip_prefix(prefix)?;
            if !rest.starts_with(|c: char| c.is_whitespace()) {
                return None;
            }
            rest.split_whitespace().next().map(str::to_string)
        })
    }

    /// The job-configuration trigger this event activates.
    ///
    /// Issue comments act on the project's latest release. Production Koji
    /// builds come from a branch and activate commit jobs. Other service
    /// events (build and test results) have no intrinsic trigger.
    pub fn job_config_trigger(&self) -> Option<JobConfigTriggerType> {
        match self.kind() {
            EventKind::PullRequest
            | EventKind::PullRequestComment
            | EventKind::CheckRerunPullRequest => Some(JobConfigTriggerType::PullRequest),
            EventKind::Push | EventKind::CheckRerunCommit | EventKind::KojiBuild => {
                Some(JobConfigTriggerType::Commit)
            }
            EventKind::Release | EventKind::CheckRerunRelease | EventKind::IssueComment => {
                Some(JobConfigTriggerType::Release)
            }
            EventKind::CoprBuild | EventKind::TestingFarmResult | EventKind::KojiTask => None,
        }
    }

    /// Target narrowing implied by a check re-run.
    pub fn target_overrides(&self) -> TargetOverrides {
        let mut overrides = TargetOverrides::default();
        let Some(check) = self.check_name() else {
            return overrides;
        };
        let Some(target) = check.target() else {
            return overrides;
        };
        let only = Some(BTreeSet::from([target.to_string()]));
        match check.prefix() {
            BUILD_CHECK_PREFIX => overrides.build_targets = only,
            TESTS_CHECK_PREFIX => overrides.tests_targets = only,
            PROPOSE_DOWNSTREAM_CHECK_PREFIX => overrides.branches = only,
            _ => {}
        }
        overrides
    }
}
