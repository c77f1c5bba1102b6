//! Which forge namespaces may use the service.
//!
//! Entries are keyed by namespace path: `forge[/namespace...][/repo.git]`,
//! e.g. `github.com/packit` or `gitlab.com/packit-service/src/glibc.git`.
//! Approval is hierarchical. A repository is approved when its own entry, or
//! the nearest ancestor entry that decided, is approved.

use std::collections::{BTreeMap, BTreeSet};

use dispatch::{ActorLogin, Event, ProjectUrl};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Approval state of one namespace path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowlistStatus {
    ApprovedAutomatically,
    ApprovedManually,
    Waiting,
    Denied,
}

impl AllowlistStatus {
    fn decision(self) -> Option<bool> {
        match self {
            AllowlistStatus::ApprovedAutomatically | AllowlistStatus::ApprovedManually => {
                Some(true)
            }
            AllowlistStatus::Denied => Some(false),
            AllowlistStatus::Waiting => None,
        }
    }
}

/// Namespace approvals plus the accounts that bypass them.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    entries: BTreeMap<String, AllowlistStatus>,
    admins: BTreeSet<ActorLogin>,
    approve_undecided: bool,
}

impl Allowlist {
    /// An allowlist holding `entries`; undecided paths are denied.
    pub fn new(entries: BTreeMap<String, AllowlistStatus>) -> Self {
        Self {
            entries,
            ..Self::default()
        }
    }

    /// An allowlist that approves every path no entry decides.
    ///
    /// Used when no allowlist is configured. Explicit `denied` entries still
    /// deny.
    pub fn permissive() -> Self {
        Self {
            approve_undecided: true,
            ..Self::default()
        }
    }

    /// Parses a JSON object mapping namespace paths to statuses.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    /// Accounts that bypass the allowlist.
    #[must_use]
    pub fn with_admins(mut self, admins: impl IntoIterator<Item = ActorLogin>) -> Self {
        self.admins.extend(admins);
        self
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` without entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decides `namespace`, walking up to its ancestors while undecided.
    pub fn is_approved(&self, namespace: &str) -> bool {
        let mut path = namespace.trim_end_matches('/');
        loop {
            if let Some(decision) = self.entries.get(path).and_then(|s| s.decision()) {
                debug!(namespace, entry = path, approved = decision, "Allowlist entry decided");
                return decision;
            }
            match path.rsplit_once('/') {
                Some((parent, _)) => path = parent,
                None => break,
            }
        }
        self.approve_undecided
    }

    /// Returns `true` if `actor` is an admin.
    pub fn is_admin(&self, actor: Option<&ActorLogin>) -> bool {
        actor.is_some_and(|a| self.admins.contains(a))
    }

    /// Decides whether `event`'s project may be served.
    pub fn is_event_allowed(&self, event: &Event) -> bool {
        if self.is_admin(event.actor.as_ref()) {
            debug!("Actor is an admin, skipping allowlist");
            return true;
        }
        let path = namespace_path(&event.project.project_url);
        let approved = self.is_approved(&path);
        if !approved {
            info!(namespace = %path, "Project is not on the allowlist");
        }
        approved
    }
}

/// Namespace path of a project URL: scheme stripped, `.git` appended.
pub fn namespace_path(url: &ProjectUrl) -> String {
    let url = url.as_str();
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let trimmed = without_scheme.trim_end_matches('/');
    if trimmed.ends_with(".git") {
        trimmed.to_string()
    } else {
        format!("{trimmed}.git")
    }
}
