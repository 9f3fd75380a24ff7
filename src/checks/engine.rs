//! Check registry and executor.
//!
//! Registration validates every definition up front so that an illegal check
//! never reaches the live pipeline. Execution classifies each hook run as
//! `success`, `skipped` or `failure`:
//!
//! 1. Any hook error, failed assertion, non-dict state assignment, or
//!    non-literal resulting state is a `failure`. A state replaced in place
//!    by a non-dict is put back to the tree it held before the run. Mutations made before the
//!    failure stay in the live state.
//! 2. Otherwise the state is serialized before and after the run. A changed
//!    state is a `success`; an unchanged one is `skipped`.
//!
//! A hook that asserts nothing and mutates nothing is therefore always
//! skipped, and a hook whose mutation reaches a fixed point succeeds once and
//! is skipped from then on.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::checks::context::{HookContext, HookError, HookLimits};
use crate::checks::tags::{legal_name, TagFilter};
use crate::checks::{CheckDefinition, Hook, HookKind};
use crate::models::protocol::{CallVerifProgress, CheckOrigin, VerifStatus};
use crate::models::value::StateValue;
use crate::sink::ProgressSink;
use crate::{AppError, Result};

/// Default maximum execution steps per hook run.
pub const DEFAULT_STEP_BUDGET: u64 = 100_000;

/// Default wall-clock timeout per hook run.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// Resource limits applied to every hook run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckLimits {
    /// Maximum execution steps.
    pub step_budget: u64,
    /// Wall-clock timeout, further capped by the call's shared deadline.
    pub check_timeout: Duration,
}

impl Default for CheckLimits {
    fn default() -> Self {
        Self {
            step_budget: DEFAULT_STEP_BUDGET,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }
}

/// Classification of one check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// The check passed and had an effect.
    Success,
    /// The check ran without any effect.
    Skipped,
    /// The check failed.
    Failure,
}

impl From<OutcomeStatus> for VerifStatus {
    fn from(status: OutcomeStatus) -> Self {
        match status {
            OutcomeStatus::Success => Self::Success,
            OutcomeStatus::Skipped => Self::Skipped,
            OutcomeStatus::Failure => Self::Failure,
        }
    }
}

/// Outcome of one check run, built-in or user-defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Check name.
    pub name: String,
    /// Where the check comes from.
    pub origin: CheckOrigin,
    /// Classification.
    pub status: OutcomeStatus,
    /// Failure reason lines.
    pub reason: Vec<String>,
    /// Time spent running.
    pub elapsed: Duration,
    /// Execution steps consumed.
    pub execution_steps: u64,
    /// Whether the check is user-defined.
    pub user_property: bool,
    /// Whether the run was abandoned on deadline or cancellation.
    pub abandoned: bool,
}

impl CheckOutcome {
    /// Outcome of a built-in caller check: failing iff it produced reasons.
    #[must_use]
    pub fn built_in(name: &str, reason: Vec<String>, elapsed: Duration) -> Self {
        let status = if reason.is_empty() {
            OutcomeStatus::Success
        } else {
            OutcomeStatus::Failure
        };
        Self {
            name: name.to_owned(),
            origin: CheckOrigin::BuiltIn,
            status,
            reason,
            elapsed,
            execution_steps: 0,
            user_property: false,
            abandoned: false,
        }
    }

    /// Whether the check failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == OutcomeStatus::Failure
    }

    /// Progress message reporting this outcome upstream.
    #[must_use]
    pub fn to_progress(&self) -> CallVerifProgress {
        CallVerifProgress {
            name: self.name.clone(),
            origin: self.origin,
            status: self.status.into(),
            reason: self.reason.clone(),
            elapsed_ns: u64::try_from(self.elapsed.as_nanos()).unwrap_or(u64::MAX),
            execution_steps: self.execution_steps,
            user_property: self.user_property,
        }
    }
}

struct RegisteredCheck {
    name: String,
    kind: HookKind,
    hook: Arc<dyn Hook>,
    tags: BTreeSet<String>,
    state: StateValue,
}

/// Registry and executor of user checks.
///
/// Checks run in registration order. Each after-response check owns a live
/// state tree that persists across every call of the campaign.
pub struct CheckEngine {
    checks: Vec<RegisteredCheck>,
    filter: TagFilter,
    limits: CheckLimits,
}

impl CheckEngine {
    /// Create an empty registry.
    #[must_use]
    pub fn new(filter: TagFilter, limits: CheckLimits) -> Self {
        Self {
            checks: Vec::new(),
            filter,
            limits,
        }
    }

    /// Validate and register a check.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when:
    /// - the name is illegal or already registered;
    /// - the definition has both hooks or neither;
    /// - the hook does not take exactly one parameter;
    /// - a `before_request` check declares a non-empty state;
    /// - the initial state is not a dict of literals;
    /// - a tag is illegal.
    pub fn register(&mut self, def: CheckDefinition) -> Result<()> {
        let CheckDefinition {
            name,
            before_request,
            after_response,
            tags,
            state,
        } = def;

        legal_name("check", &name)?;
        if self.checks.iter().any(|c| c.name == name) {
            return Err(AppError::Config(format!(
                "check {name:?} is already registered"
            )));
        }

        let (kind, hook) = match (before_request, after_response) {
            (Some(hook), None) => (HookKind::BeforeRequest, hook),
            (None, Some(hook)) => (HookKind::AfterResponse, hook),
            (Some(_), Some(_)) => {
                return Err(AppError::Config(format!(
                    "check {name:?} must define only one of before_request or after_response"
                )))
            }
            (None, None) => {
                return Err(AppError::Config(format!(
                    "check {name:?} must define one of before_request or after_response"
                )))
            }
        };

        let arity = hook.arity();
        if arity != 1 {
            return Err(AppError::Config(format!(
                "check {name:?} hook must take exactly one parameter, takes {arity}"
            )));
        }

        let state = match (kind, state) {
            (_, None) => StateValue::empty_dict(),
            (HookKind::BeforeRequest, Some(state)) if state == StateValue::empty_dict() => state,
            (HookKind::BeforeRequest, Some(_)) => {
                return Err(AppError::Config(format!(
                    "check {name:?} can only have state with an after_response hook"
                )))
            }
            (HookKind::AfterResponse, Some(state)) => {
                if !state.is_dict() {
                    return Err(AppError::Config(format!(
                        "check {name:?} state must be a dict, got {}",
                        state.type_name()
                    )));
                }
                if !state.is_literal() {
                    return Err(AppError::Config(format!(
                        "check {name:?} state must only contain literal values"
                    )));
                }
                state
            }
        };

        for tag in &tags {
            legal_name("tag", tag)?;
        }

        debug!(check = %name, ?kind, "check registered");
        self.checks.push(RegisteredCheck {
            name,
            kind,
            hook,
            tags,
            state,
        });
        Ok(())
    }

    /// Number of registered checks, excluded ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Whether no check is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Indices of the checks of `kind` that the tag filter lets through, in
    /// registration order.
    #[must_use]
    pub fn active(&self, kind: HookKind) -> Vec<usize> {
        self.checks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == kind && !self.filter.excludes(&c.tags))
            .map(|(i, _)| i)
            .collect()
    }

    /// Name of the check at `index`.
    #[must_use]
    pub fn name(&self, index: usize) -> Option<&str> {
        self.checks.get(index).map(|c| c.name.as_str())
    }

    /// Live state of the named check.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<&StateValue> {
        self.checks.iter().find(|c| c.name == name).map(|c| &c.state)
    }

    /// Run the check at `index` and classify its outcome.
    ///
    /// The run is bounded by the step budget and by the earlier of
    /// `call_deadline` and the per-check timeout. Diagnostic output is
    /// forwarded to `sink`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Check` when `index` does not designate a check.
    pub fn run(
        &mut self,
        index: usize,
        request: &StateValue,
        response: Option<&StateValue>,
        call_deadline: Instant,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<CheckOutcome> {
        let check = self
            .checks
            .get_mut(index)
            .ok_or_else(|| AppError::Check(format!("no check at index {index}")))?;

        let started = Instant::now();
        let limits = HookLimits {
            max_steps: self.limits.step_budget,
            deadline: call_deadline.min(started + self.limits.check_timeout),
            cancel: cancel.clone(),
        };

        let mut scratch = StateValue::empty_dict();
        let state = match check.kind {
            HookKind::BeforeRequest => &mut scratch,
            HookKind::AfterResponse => &mut check.state,
        };
        let before = state.to_canonical_json().ok();

        let hook = Arc::clone(&check.hook);
        let mut ctx = HookContext::new(request, response, &mut *state, limits);
        let result = catch_unwind(AssertUnwindSafe(|| hook.call(&mut ctx)))
            .unwrap_or_else(|_| Err(HookError::Script("hook panicked".into())));
        let execution_steps = ctx.steps();
        let bad_assignment = ctx.bad_assignment().map(str::to_owned);
        let output = ctx.take_output();
        drop(ctx);

        for line in output {
            sink.printf(&format!("{}: {line}", check.name));
        }

        let mut abandoned = false;
        let (status, reason) = match result {
            Err(err) => {
                abandoned = err.is_cancellation();
                (OutcomeStatus::Failure, reason_lines(&err.to_string()))
            }
            Ok(()) => match (bad_assignment, state.to_canonical_json()) {
                (Some(kind), _) => (
                    OutcomeStatus::Failure,
                    vec![HookError::StateNotTree(kind).to_string()],
                ),
                (None, _) if !state.is_dict() => {
                    let kind = state.type_name().to_owned();
                    *state = restore(before.as_deref());
                    (
                        OutcomeStatus::Failure,
                        vec![HookError::StateNotTree(kind).to_string()],
                    )
                }
                (None, Err(err)) => (
                    OutcomeStatus::Failure,
                    vec![format!("state is not a literal tree: {err}")],
                ),
                (None, Ok(after)) if before.as_deref() == Some(after.as_str()) => {
                    (OutcomeStatus::Skipped, Vec::new())
                }
                (None, Ok(_)) => (OutcomeStatus::Success, Vec::new()),
            },
        };

        if abandoned {
            info!(check = %check.name, "check abandoned");
        }

        Ok(CheckOutcome {
            name: check.name.clone(),
            origin: check.kind.origin(),
            status,
            reason,
            elapsed: started.elapsed(),
            execution_steps,
            user_property: true,
            abandoned,
        })
    }
}

/// The tree a check held before a run that replaced it with a non-dict.
fn restore(before: Option<&str>) -> StateValue {
    before
        .and_then(|json| serde_json::from_str(json).ok())
        .filter(StateValue::is_dict)
        .unwrap_or_else(StateValue::empty_dict)
}

fn reason_lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_owned).collect()
}
