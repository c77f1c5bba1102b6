//! Newtype domain identifiers.
//!
//! Every concept with an identity is a distinct newtype wrapping a primitive, so a
//! [`RepoNamespace`] can never be passed where a [`RepoName`] is expected even
//! though both are strings underneath.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, from_static(), as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Creates an identifier from a string literal.
            ///
            /// # Panics
            ///
            /// Panics if `value` is empty.
            pub fn from_static(value: &'static str) -> Self {
                assert!(!value.is_empty(), concat!(stringify!($name), " must not be empty"));
                Self(value.to_string())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Macro for u64-wrapped newtypes (forge-assigned integers).
// Generates: struct (Copy), new(), as_u64(), Display.
// ---------------------------------------------------------------------------
macro_rules! u64_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new identifier from a raw integer.
            pub fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the underlying integer value.
            pub fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: forge-integer-backed
// ---------------------------------------------------------------------------

u64_id! {
    /// Number of a pull request (merge request on GitLab) on the forge.
    PullRequestId
}

u64_id! {
    /// Number of an issue on the forge.
    IssueId
}

u64_id! {
    /// Forge-assigned identifier of a single comment.
    CommentId
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies one queued task. Re-deliveries of the same task keep the same id,
/// so every attempt of a dispatch unit can be correlated in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generates a new random task identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a [`TaskId`] from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed
// ---------------------------------------------------------------------------

string_id! {
    /// Stable identity of a handler variant (e.g. `"copr_build"`).
    ///
    /// Registry lookups, dispatch units and log context all use this key.
    HandlerId
}

string_id! {
    /// Name under which a handler's task is submitted to the delivery queue
    /// (e.g. `"task.run_copr_build_handler"`). One per handler.
    TaskName
}

string_id! {
    /// Web URL of a project on its forge (e.g. `"https://github.com/packit/ogr"`).
    ProjectUrl
}

string_id! {
    /// Namespace (owner, group or nested group path) of a repository.
    RepoNamespace
}

string_id! {
    /// Repository name within its namespace.
    RepoName
}

string_id! {
    /// A Git commit SHA.
    CommitSha
}

string_id! {
    /// A Git reference, usually a branch name.
    GitRef
}

string_id! {
    /// A Git tag name attached to a release.
    TagName
}

string_id! {
    /// Login of the forge account that caused an event.
    ActorLogin
}

string_id! {
    /// Full name of a commit check, in `<prefix>:<target>` form
    /// (e.g. `"rpm-build:fedora-rawhide-x86_64"`).
    CheckName
}

impl CheckName {
    /// Returns the part of the check name before the first `:`.
    ///
    /// A name without a separator is entirely prefix.
    pub fn prefix(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(p, _)| p)
    }

    /// Returns the part of the check name after the first `:`, if any.
    pub fn target(&self) -> Option<&str> {
        self.0
            .split_once(':')
            .map(|(_, t)| t)
            .filter(|t| !t.is_empty())
    }
}
