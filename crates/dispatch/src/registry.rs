//! Handler registry.
//!
//! Every handler variant is described once at process start by a
//! [`HandlerDescriptor`]: the job types it is configured as, the job types it is
//! a prerequisite for, the events it reacts to, and the optional comment
//! commands and check-rerun prefixes that gate it. A [`RegistryBuilder`]
//! collects descriptors and inverts them into the lookup tables of an immutable
//! [`HandlerRegistry`].
//!
//! The registry has no mutating methods. Share it by reference (or install it
//! process-wide with [`HandlerRegistry::install`]); concurrent reads need no
//! locking.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use tracing::debug;

use crate::errors::DispatchError;
use crate::event::{EventKind, EventMatcher};
use crate::job::JobType;
use crate::{HandlerId, TaskName};

static GLOBAL_REGISTRY: OnceLock<HandlerRegistry> = OnceLock::new();

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Static description of one handler variant.
///
/// Built with the fluent registration methods; calling a method several times
/// accumulates (set union), it never replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerDescriptor {
    id: HandlerId,
    task_name: TaskName,
    configured_as: BTreeSet<JobType>,
    required_for: BTreeSet<JobType>,
    reacts_to: BTreeSet<EventMatcher>,
    comment_commands: BTreeSet<String>,
    check_prefixes: BTreeSet<String>,
}

impl HandlerDescriptor {
    /// Starts a descriptor for handler `id`, submitted under `task_name`.
    pub fn new(id: HandlerId, task_name: TaskName) -> Self {
        Self {
            id,
            task_name,
            configured_as: BTreeSet::new(),
            required_for: BTreeSet::new(),
            reacts_to: BTreeSet::new(),
            comment_commands: BTreeSet::new(),
            check_prefixes: BTreeSet::new(),
        }
    }

    /// The handler serves job configurations of `job_type`.
    #[must_use]
    pub fn configured_as(mut self, job_type: JobType) -> Self {
        self.configured_as.insert(job_type);
        self
    }

    /// The handler is a prerequisite of `job_type` jobs (tests need a build).
    ///
    /// When a project declares a `job_type` job but none of the handler's own
    /// job types, the handler runs once with the dependent job's configuration.
    #[must_use]
    pub fn required_for(mut self, job_type: JobType) -> Self {
        self.required_for.insert(job_type);
        self
    }

    /// The handler reacts to events matched by `matcher`.
    #[must_use]
    pub fn reacts_to(mut self, matcher: impl Into<EventMatcher>) -> Self {
        self.reacts_to.insert(matcher.into());
        self
    }

    /// The handler runs for the comment command `command`.
    #[must_use]
    pub fn run_for_comment(mut self, command: &str) -> Self {
        self.comment_commands.insert(command.to_string());
        self
    }

    /// The handler runs when a check whose name starts with `prefix` is re-run.
    #[must_use]
    pub fn run_for_check_rerun(mut self, prefix: &str) -> Self {
        self.check_prefixes.insert(prefix.to_string());
        self
    }

    /// Handler identity.
    pub fn id(&self) -> &HandlerId {
        &self.id
    }

    /// Queue task name.
    pub fn task_name(&self) -> &TaskName {
        &self.task_name
    }

    /// Job types the handler is configured as.
    pub fn configured_job_types(&self) -> &BTreeSet<JobType> {
        &self.configured_as
    }

    /// Job types the handler is a prerequisite for.
    pub fn required_for_job_types(&self) -> &BTreeSet<JobType> {
        &self.required_for
    }

    /// Event matchers the handler reacts to.
    pub fn event_matchers(&self) -> &BTreeSet<EventMatcher> {
        &self.reacts_to
    }

    /// Comment commands gating the handler.
    pub fn comment_commands(&self) -> &BTreeSet<String> {
        &self.comment_commands
    }

    /// Check-rerun prefixes gating the handler.
    pub fn check_prefixes(&self) -> &BTreeSet<String> {
        &self.check_prefixes
    }

    /// Returns `true` if the handler reacts to `kind`.
    pub fn reacts_to_kind(&self, kind: EventKind) -> bool {
        self.reacts_to.iter().any(|m| m.matches(kind))
    }

    fn merge(&mut self, other: HandlerDescriptor) {
        self.configured_as.extend(other.configured_as);
        self.required_for.extend(other.required_for);
        self.reacts_to.extend(other.reacts_to);
        self.comment_commands.extend(other.comment_commands);
        self.check_prefixes.extend(other.check_prefixes);
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects descriptors during bootstrap.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    descriptors: BTreeMap<HandlerId, HandlerDescriptor>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler.
    ///
    /// Registering the same handler id again merges the declarations by set
    /// union. The task name of the first registration is kept.
    #[must_use]
    pub fn register(mut self, descriptor: HandlerDescriptor) -> Self {
        match self.descriptors.get_mut(descriptor.id()) {
            Some(existing) => {
                debug!(handler = %descriptor.id(), "Merging repeated handler registration");
                existing.merge(descriptor);
            }
            None => {
                self.descriptors.insert(descriptor.id().clone(), descriptor);
            }
        }
        self
    }

    /// Inverts the descriptors into lookup tables.
    pub fn build(self) -> HandlerRegistry {
        let mut by_job_type: BTreeMap<JobType, BTreeSet<HandlerId>> = BTreeMap::new();
        let mut by_required_job_type: BTreeMap<JobType, BTreeSet<HandlerId>> = BTreeMap::new();
        let mut by_comment: BTreeMap<String, BTreeSet<HandlerId>> = BTreeMap::new();
        let mut by_check_prefix: BTreeMap<String, BTreeSet<HandlerId>> = BTreeMap::new();

        for (id, descriptor) in &self.descriptors {
            for job_type in &descriptor.configured_as {
                by_job_type.entry(*job_type).or_default().insert(id.clone());
            }
            for job_type in &descriptor.required_for {
                by_required_job_type
                    .entry(*job_type)
                    .or_default()
                    .insert(id.clone());
            }
            for command in &descriptor.comment_commands {
                by_comment.entry(command.clone()).or_default().insert(id.clone());
            }
            for prefix in &descriptor.check_prefixes {
                by_check_prefix
                    .entry(prefix.clone())
                    .or_default()
                    .insert(id.clone());
            }
        }

        debug!(handlers = self.descriptors.len(), "Handler registry built");

        HandlerRegistry {
            descriptors: self.descriptors,
            by_job_type,
            by_required_job_type,
            by_comment,
            by_check_prefix,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable lookup tables over all registered handlers.
///
/// Event matching is stored per handler and queried per event, because a
/// handler may react to an abstract class of events.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    descriptors: BTreeMap<HandlerId, HandlerDescriptor>,
    by_job_type: BTreeMap<JobType, BTreeSet<HandlerId>>,
    by_required_job_type: BTreeMap<JobType, BTreeSet<HandlerId>>,
    by_comment: BTreeMap<String, BTreeSet<HandlerId>>,
    by_check_prefix: BTreeMap<String, BTreeSet<HandlerId>>,
}

impl HandlerRegistry {
    /// Starts a new registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Installs `registry` as the process-wide registry.
    ///
    /// Succeeds exactly once per process.
    pub fn install(registry: HandlerRegistry) -> Result<&'static HandlerRegistry, DispatchError> {
        GLOBAL_REGISTRY
            .set(registry)
            .map_err(|_| DispatchError::RegistryAlreadyInstalled)?;
        GLOBAL_REGISTRY
            .get()
            .ok_or(DispatchError::RegistryAlreadyInstalled)
    }

    /// The process-wide registry, if one was installed.
    pub fn global() -> Option<&'static HandlerRegistry> {
        GLOBAL_REGISTRY.get()
    }

    /// Descriptor of handler `id`.
    pub fn descriptor(&self, id: &HandlerId) -> Option<&HandlerDescriptor> {
        self.descriptors.get(id)
    }

    /// All descriptors, ordered by handler id.
    pub fn descriptors(&self) -> impl Iterator<Item = &HandlerDescriptor> {
        self.descriptors.values()
    }

    /// Queue task name of handler `id`.
    pub fn task_name(&self, id: &HandlerId) -> Option<&TaskName> {
        self.descriptors.get(id).map(HandlerDescriptor::task_name)
    }

    /// Handlers configured as `job_type`.
    pub fn handlers_for_job_type(&self, job_type: JobType) -> BTreeSet<HandlerId> {
        self.by_job_type.get(&job_type).cloned().unwrap_or_default()
    }

    /// Handlers that are prerequisites of `job_type` jobs.
    pub fn prerequisites_for(&self, job_type: JobType) -> BTreeSet<HandlerId> {
        self.by_required_job_type
            .get(&job_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Handlers reacting to events of `kind`.
    pub fn handlers_reacting_to(&self, kind: EventKind) -> BTreeSet<HandlerId> {
        self.descriptors
            .values()
            .filter(|d| d.reacts_to_kind(kind))
            .map(|d| d.id.clone())
            .collect()
    }

    /// Handlers gated by comment command `command`.
    pub fn handlers_for_comment(&self, command: &str) -> BTreeSet<HandlerId> {
        self.by_comment.get(command).cloned().unwrap_or_default()
    }

    /// Handlers gated by check-rerun prefix `prefix`.
    pub fn handlers_for_check_prefix(&self, prefix: &str) -> BTreeSet<HandlerId> {
        self.by_check_prefix.get(prefix).cloned().unwrap_or_default()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns `true` if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
