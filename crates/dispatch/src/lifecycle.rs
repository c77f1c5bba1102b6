//! Handler execution contract: pre-check, run, clean-up.
//!
//! Every task attempt goes through [`execute_attempt`], whatever the concrete
//! handler. The attempt wipes the shared working directory on entry and on
//! every exit path, runs all of the handler's [`Checker`]s, and only then
//! builds and runs the handler. Faults raised by `run` (errors and panics)
//! never escape: they become a failed [`ExecutionResult`] plus the
//! [`RetryPolicy`] the retry controller acts on.
//!
//! ## Attempt states
//!
//! ```text
//! Created -> Prechecked(pass) -> Running -> Succeeded | Failed
//!         -> Prechecked(fail) -> Skipped
//! ```
//!
//! A retry is a new message and therefore a new [`Attempt`] starting from
//! `Created`.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::{DispatchError, HandlerError, RetryPolicy};
use crate::event::Event;
use crate::job::{JobConfig, PackageConfig};
use crate::ports::Workplace;
use crate::registry::HandlerDescriptor;
use crate::result::ExecutionResult;
use crate::task::{TaskMessage, TaskPayload};
use crate::{HandlerId, TaskName};

// ---------------------------------------------------------------------------
// Handler-facing traits
// ---------------------------------------------------------------------------

/// What a checker sees: the task payload, borrowed.
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    pub package_config: &'a PackageConfig,
    pub job_config: Option<&'a JobConfig>,
    pub event: &'a Event,
}

impl<'a> CheckContext<'a> {
    /// Borrows the fields of `payload`.
    pub fn from_payload(payload: &'a TaskPayload) -> Self {
        Self {
            package_config: &payload.package_config,
            job_config: payload.job_config.as_ref(),
            event: &payload.event,
        }
    }
}

/// An independent predicate a handler requires before it runs.
pub trait Checker: Send + Sync {
    /// Name used in logs when the check fails.
    fn name(&self) -> &'static str;

    /// Returns `false` to skip the task.
    fn pre_check(&self, ctx: &CheckContext<'_>) -> bool;
}

/// A handler instance bound to one task payload.
#[async_trait]
pub trait JobHandler: Send {
    /// Identity of the handler variant.
    fn id(&self) -> &HandlerId;

    /// Performs the handler's work.
    async fn run(&mut self) -> Result<ExecutionResult, HandlerError>;

    /// Releases resources acquired by `run`. Called after every run,
    /// including failed and panicked ones.
    fn clean(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Context attached to the handler's log records.
    fn tags(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([("handler", self.id().to_string())])
    }
}

/// Constructs handler instances for delivered tasks.
///
/// One factory exists per handler variant. It also carries the variant's
/// registry declarations, so the registry and the worker are built from the
/// same list.
pub trait HandlerFactory: Send + Sync {
    /// Registry declarations of the variant.
    fn descriptor(&self) -> HandlerDescriptor;

    /// Pre-check predicates, in evaluation order.
    fn checkers(&self) -> Vec<Box<dyn Checker>> {
        Vec::new()
    }

    /// Builds a handler for `payload`.
    fn build(&self, payload: &TaskPayload) -> Result<Box<dyn JobHandler>, HandlerError>;

    /// Queue task name of the variant.
    fn task_name(&self) -> TaskName {
        self.descriptor().task_name().clone()
    }
}

// ---------------------------------------------------------------------------
// Attempt state machine
// ---------------------------------------------------------------------------

/// Lifecycle state of one task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Created,
    Prechecked { passed: bool },
    Skipped,
    Running,
    Succeeded,
    Failed,
}

impl AttemptState {
    fn name(self) -> &'static str {
        match self {
            AttemptState::Created => "created",
            AttemptState::Prechecked { passed: true } => "prechecked(pass)",
            AttemptState::Prechecked { passed: false } => "prechecked(fail)",
            AttemptState::Skipped => "skipped",
            AttemptState::Running => "running",
            AttemptState::Succeeded => "succeeded",
            AttemptState::Failed => "failed",
        }
    }

    /// Returns `true` once the attempt can make no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptState::Skipped | AttemptState::Succeeded | AttemptState::Failed
        )
    }
}

/// One attempt at executing a task.
#[derive(Debug, Clone)]
pub struct Attempt {
    number: u32,
    state: AttemptState,
}

impl Attempt {
    /// A fresh attempt; `number` is the delivery's attempt count.
    pub fn new(number: u32) -> Self {
        Self {
            number,
            state: AttemptState::Created,
        }
    }

    /// Attempt count supplied by the delivery.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Current state.
    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// `Created -> Prechecked`.
    pub fn record_precheck(&mut self, passed: bool) -> Result<(), DispatchError> {
        self.transition(AttemptState::Prechecked { passed }, |s| {
            s == AttemptState::Created
        })
    }

    /// `Prechecked(fail) -> Skipped`.
    pub fn skip(&mut self) -> Result<(), DispatchError> {
        self.transition(AttemptState::Skipped, |s| {
            s == AttemptState::Prechecked { passed: false }
        })
    }

    /// `Prechecked(pass) -> Running`.
    pub fn start(&mut self) -> Result<(), DispatchError> {
        self.transition(AttemptState::Running, |s| {
            s == AttemptState::Prechecked { passed: true }
        })
    }

    /// `Running -> Succeeded | Failed`.
    pub fn finish(&mut self, success: bool) -> Result<(), DispatchError> {
        let to = if success {
            AttemptState::Succeeded
        } else {
            AttemptState::Failed
        };
        self.transition(to, |s| s == AttemptState::Running)
    }

    fn transition(
        &mut self,
        to: AttemptState,
        allowed_from: impl Fn(AttemptState) -> bool,
    ) -> Result<(), DispatchError> {
        if !allowed_from(self.state) {
            return Err(DispatchError::InvalidTransition {
                from: self.state.name(),
                to: to.name(),
            });
        }
        self.state = to;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Workplace guard
// ---------------------------------------------------------------------------

/// Wipes the working directory when created and again when dropped.
///
/// Cleaning failures are logged; they never change the attempt's outcome.
pub struct WorkplaceGuard<'a> {
    workplace: &'a dyn Workplace,
}

impl<'a> WorkplaceGuard<'a> {
    /// Wipes `workplace` and returns a guard that wipes it again on drop.
    pub fn enter(workplace: &'a dyn Workplace) -> Self {
        wipe(workplace);
        Self { workplace }
    }
}

impl Drop for WorkplaceGuard<'_> {
    fn drop(&mut self) {
        wipe(self.workplace);
    }
}

fn wipe(workplace: &dyn Workplace) {
    if let Err(e) = workplace.clean() {
        warn!(error = %e, "Failed to clean workplace");
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// A checker vetoed the task. Not a failure.
    Skipped,
    /// The handler ran and reported success.
    Succeeded(ExecutionResult),
    /// The handler failed; `retry` says whether re-delivery may help.
    Failed {
        result: ExecutionResult,
        retry: RetryPolicy,
    },
}

impl AttemptOutcome {
    /// The run's result, if the handler ran.
    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            AttemptOutcome::Skipped => None,
            AttemptOutcome::Succeeded(result) | AttemptOutcome::Failed { result, .. } => {
                Some(result)
            }
        }
    }
}

/// Runs every checker and returns their conjunction.
///
/// All checkers run even after one fails, so every failing name is logged.
pub fn run_checkers(checkers: &[Box<dyn Checker>], ctx: &CheckContext<'_>) -> bool {
    let mut passed = true;
    for checker in checkers {
        if !checker.pre_check(ctx) {
            info!(checker = checker.name(), "Pre-check failed");
            passed = false;
        }
    }
    passed
}

/// Executes one attempt of `message` with the handler built by `factory`.
///
/// Returns `Err` only for dispatcher bugs (an illegal state transition).
/// Handler faults are reported through [`AttemptOutcome::Failed`].
#[instrument(
    skip_all,
    fields(
        task_name = %message.task_name,
        attempt = message.attempt,
        namespace = %message.payload.event.project.namespace,
        repository = %message.payload.event.project.repo_name,
    )
)]
pub async fn execute_attempt(
    factory: &dyn HandlerFactory,
    message: &TaskMessage,
    workplace: &dyn Workplace,
) -> Result<AttemptOutcome, DispatchError> {
    let mut attempt = Attempt::new(message.attempt);
    let _guard = WorkplaceGuard::enter(workplace);

    let ctx = CheckContext::from_payload(&message.payload);
    let passed = run_checkers(&factory.checkers(), &ctx);
    attempt.record_precheck(passed)?;
    if !passed {
        attempt.skip()?;
        info!("Task skipped by pre-check");
        return Ok(AttemptOutcome::Skipped);
    }

    attempt.start()?;

    let mut handler = match factory.build(&message.payload) {
        Ok(handler) => handler,
        Err(e) => {
            error!(error = %e, "Failed to construct handler");
            attempt.finish(false)?;
            return Ok(AttemptOutcome::Failed {
                result: ExecutionResult::failure(e.message()),
                retry: e.retry_policy().clone(),
            });
        }
    };

    let tags = handler.tags();
    debug!(handler = %handler.id(), "Running handler");

    let run = AssertUnwindSafe(handler.run()).catch_unwind().await;

    let outcome = match run {
        Ok(Ok(result)) if result.success => AttemptOutcome::Succeeded(result),
        Ok(Ok(result)) => AttemptOutcome::Failed {
            result,
            retry: RetryPolicy::NonRetryable,
        },
        Ok(Err(e)) => {
            error!(tags = ?tags, error = %e, "Handler run failed");
            AttemptOutcome::Failed {
                result: ExecutionResult::failure(e.message()),
                retry: e.retry_policy().clone(),
            }
        }
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            error!(tags = ?tags, panic = %reason, "Handler run panicked");
            AttemptOutcome::Failed {
                result: ExecutionResult::failure(format!("Handler panicked: {reason}")),
                retry: RetryPolicy::retryable(),
            }
        }
    };

    if let Err(e) = handler.clean() {
        warn!(tags = ?tags, error = %e, "Handler clean-up failed");
    }

    attempt.finish(matches!(outcome, AttemptOutcome::Succeeded(_)))?;
    Ok(outcome)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
