//! Execution context handed to a check hook.
//!
//! The context exposes three values: `request` and `response` are frozen
//! views of the current call, `state` is the check's live tree. Once the hook
//! has touched `state`, reading `request` or `response` again is an
//! access-order error: the state must only ever be derived from data read
//! before it.
//!
//! Every accessor counts as one execution step. Steps are checked against the
//! budget, the wall-clock deadline and the session cancellation token, which
//! is how a running hook gets interrupted.

use std::fmt::{Display, Formatter};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::models::value::StateValue;

/// Why a hook stopped before completing normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookError {
    /// An assertion inside the hook failed.
    Assertion(String),
    /// `request`/`response` read after `state`.
    AccessOrder(String),
    /// `state` reassigned to something that is not a tree.
    StateNotTree(String),
    /// The requested value does not exist for this hook kind.
    Unavailable(String),
    /// The hook used more execution steps than allowed.
    StepBudgetExceeded(u64),
    /// The hook ran past its deadline.
    DeadlineExceeded,
    /// The session was cancelled while the hook ran.
    Cancelled,
    /// Any other hook failure (script error, runtime error).
    Script(String),
}

impl HookError {
    /// Whether the hook was abandoned rather than failing on its own.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::DeadlineExceeded | Self::Cancelled)
    }
}

impl Display for HookError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Assertion(msg) => write!(f, "assertion failed: {msg}"),
            Self::AccessOrder(msg) => write!(f, "access order: {msg}"),
            Self::StateNotTree(kind) => write!(f, "state must be a dict, got {kind}"),
            Self::Unavailable(what) => write!(f, "{what} is not available here"),
            Self::StepBudgetExceeded(max) => {
                write!(f, "too many execution steps (max {max})")
            }
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Script(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for HookError {}

/// Result type returned by hooks and context accessors.
pub type HookResult<T> = std::result::Result<T, HookError>;

/// Limits applied to one hook run.
#[derive(Debug, Clone)]
pub struct HookLimits {
    /// Maximum number of execution steps.
    pub max_steps: u64,
    /// Wall-clock deadline.
    pub deadline: Instant,
    /// Session-wide cancellation.
    pub cancel: CancellationToken,
}

/// What a hook can see and touch.
pub struct HookContext<'a> {
    request: &'a StateValue,
    response: Option<&'a StateValue>,
    state: &'a mut StateValue,
    state_touched: bool,
    bad_assignment: Option<String>,
    steps: u64,
    limits: HookLimits,
    output: Vec<String>,
}

impl<'a> HookContext<'a> {
    pub(crate) fn new(
        request: &'a StateValue,
        response: Option<&'a StateValue>,
        state: &'a mut StateValue,
        limits: HookLimits,
    ) -> Self {
        Self {
            request,
            response,
            state,
            state_touched: false,
            bad_assignment: None,
            steps: 0,
            limits,
            output: Vec::new(),
        }
    }

    /// Account for one execution step.
    ///
    /// Hooks doing long-running work call this regularly so they can be
    /// interrupted.
    ///
    /// # Errors
    ///
    /// Fails once the step budget, the deadline or the session is exhausted.
    pub fn step(&mut self) -> HookResult<()> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(HookError::StepBudgetExceeded(self.limits.max_steps));
        }
        if self.limits.cancel.is_cancelled() {
            return Err(HookError::Cancelled);
        }
        if Instant::now() >= self.limits.deadline {
            return Err(HookError::DeadlineExceeded);
        }
        Ok(())
    }

    /// The request of the current call.
    ///
    /// # Errors
    ///
    /// Fails with [`HookError::AccessOrder`] once `state` was accessed.
    pub fn request(&mut self) -> HookResult<&StateValue> {
        self.step()?;
        if self.state_touched {
            return Err(HookError::AccessOrder(
                "cannot read request after accessing state".into(),
            ));
        }
        Ok(self.request)
    }

    /// The response of the current call.
    ///
    /// # Errors
    ///
    /// Fails with [`HookError::AccessOrder`] once `state` was accessed, and
    /// with [`HookError::Unavailable`] in `before_request` hooks.
    pub fn response(&mut self) -> HookResult<&StateValue> {
        self.step()?;
        if self.state_touched {
            return Err(HookError::AccessOrder(
                "cannot read response after accessing state".into(),
            ));
        }
        self.response
            .ok_or_else(|| HookError::Unavailable("response".into()))
    }

    /// The check's live state, mutated in place.
    ///
    /// # Errors
    ///
    /// Fails when the step budget or deadline is exhausted.
    pub fn state(&mut self) -> HookResult<&mut StateValue> {
        self.step()?;
        self.state_touched = true;
        Ok(&mut *self.state)
    }

    /// Replace the check's state wholesale.
    ///
    /// # Errors
    ///
    /// Fails with [`HookError::StateNotTree`] when `value` is not a dict; the
    /// live state is left as it was and the hook is failed even if it
    /// swallows this error.
    pub fn set_state(&mut self, value: StateValue) -> HookResult<()> {
        self.step()?;
        self.state_touched = true;
        if !value.is_dict() {
            let kind = value.type_name().to_owned();
            self.bad_assignment = Some(kind.clone());
            return Err(HookError::StateNotTree(kind));
        }
        *self.state = value;
        Ok(())
    }

    /// Fail the hook with `message` unless `condition` holds.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::Assertion`] when `condition` is false.
    pub fn assert_that(&mut self, condition: bool, message: &str) -> HookResult<()> {
        self.step()?;
        if condition {
            Ok(())
        } else {
            Err(HookError::Assertion(message.to_owned()))
        }
    }

    /// Emit a diagnostic line, forwarded to the progress sink.
    pub fn print(&mut self, message: impl Into<String>) {
        self.output.push(message.into());
    }

    pub(crate) fn steps(&self) -> u64 {
        self.steps
    }

    pub(crate) fn bad_assignment(&self) -> Option<&str> {
        self.bad_assignment.as_deref()
    }

    pub(crate) fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }
}
