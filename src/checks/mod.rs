//! User-defined checks.
//!
//! A check is a named hook run either before the request is sent or after the
//! response is received, with optional persistent state. Hooks are authored in
//! an embedded scripting language outside this crate; the engine only sees
//! them through the [`Hook`] trait.
//!
//! - `context`: what a running hook can see ([`HookContext`]).
//! - `engine`: registration rules and outcome classification.
//! - `tags`: naming rules and the tag filter.

pub mod context;
pub mod engine;
pub mod tags;

use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

pub use context::{HookContext, HookError, HookResult};
pub use engine::{CheckEngine, CheckLimits, CheckOutcome, OutcomeStatus};
pub use tags::TagFilter;

use crate::models::protocol::CheckOrigin;
use crate::models::value::StateValue;

/// When a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// Before the request is sent to the SUT.
    BeforeRequest,
    /// After the response was received and built-in checks passed.
    AfterResponse,
}

impl HookKind {
    /// Origin reported for outcomes of this hook kind.
    #[must_use]
    pub fn origin(self) -> CheckOrigin {
        match self {
            Self::BeforeRequest => CheckOrigin::BeforeRequest,
            Self::AfterResponse => CheckOrigin::AfterResponse,
        }
    }
}

/// A callable check body.
pub trait Hook: Send + Sync {
    /// Number of parameters the hook declares. Only one-parameter hooks (the
    /// context) can be registered.
    fn arity(&self) -> usize;

    /// Run the hook against `ctx`.
    ///
    /// # Errors
    ///
    /// Any [`HookError`] fails the check.
    fn call(&self, ctx: &mut HookContext<'_>) -> HookResult<()>;
}

/// [`Hook`] backed by a Rust closure taking the context.
pub struct FnHook<F>(F);

impl<F> Hook for FnHook<F>
where
    F: Fn(&mut HookContext<'_>) -> HookResult<()> + Send + Sync,
{
    fn arity(&self) -> usize {
        1
    }

    fn call(&self, ctx: &mut HookContext<'_>) -> HookResult<()> {
        (self.0)(ctx)
    }
}

/// Wrap a closure as a shareable [`Hook`].
pub fn hook_fn<F>(f: F) -> Arc<dyn Hook>
where
    F: Fn(&mut HookContext<'_>) -> HookResult<()> + Send + Sync + 'static,
{
    Arc::new(FnHook(f))
}

/// A check as declared by the user, before validation.
#[derive(Clone, Default)]
pub struct CheckDefinition {
    /// Unique check name.
    pub name: String,
    /// Hook run before the request.
    pub before_request: Option<Arc<dyn Hook>>,
    /// Hook run after the response.
    pub after_response: Option<Arc<dyn Hook>>,
    /// Tags used by the tag filter.
    pub tags: BTreeSet<String>,
    /// Initial state; only allowed with an `after_response` hook.
    pub state: Option<StateValue>,
}

impl CheckDefinition {
    /// A check with only an `after_response` hook.
    #[must_use]
    pub fn after_response(name: impl Into<String>, hook: Arc<dyn Hook>) -> Self {
        Self {
            name: name.into(),
            after_response: Some(hook),
            ..Self::default()
        }
    }

    /// A check with only a `before_request` hook.
    #[must_use]
    pub fn before_request(name: impl Into<String>, hook: Arc<dyn Hook>) -> Self {
        Self {
            name: name.into(),
            before_request: Some(hook),
            ..Self::default()
        }
    }

    /// Set the tags of this check.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the initial state of this check.
    #[must_use]
    pub fn with_state(mut self, state: StateValue) -> Self {
        self.state = Some(state);
        self
    }
}

impl Debug for CheckDefinition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckDefinition")
            .field("name", &self.name)
            .field("before_request", &self.before_request.is_some())
            .field("after_response", &self.after_response.is_some())
            .field("tags", &self.tags)
            .field("state", &self.state)
            .finish()
    }
}
