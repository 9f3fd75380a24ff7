//! API model collaborator interface.
//!
//! The schema model and the HTTP machinery live outside this crate. The
//! engine sees them only through the [`Model`] and [`Caller`] traits.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::models::protocol::Call;
use crate::models::value::StateValue;
use crate::reset::Resetter;
use crate::sink::ProgressSink;
use crate::Result;

/// Boxed future returned by collaborator trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One built-in verification supplied by the model.
///
/// `run` returns the failure reason lines; an empty list means the check
/// passed.
pub struct CallerCheck {
    /// Check name as reported upstream.
    pub name: String,
    /// Deferred verification.
    pub run: Box<dyn FnOnce() -> Vec<String> + Send>,
}

impl CallerCheck {
    /// Build a check from a name and a closure.
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: FnOnce() -> Vec<String> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }
}

impl std::fmt::Debug for CallerCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallerCheck")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Performs one live interaction with the SUT.
pub trait Caller: Send {
    /// Perform the interaction.
    ///
    /// Never fails: connection errors and the like are recorded as failing
    /// response data so that built-in checks can assert on them.
    fn invoke<'a>(&'a mut self, cancel: &'a CancellationToken) -> BoxFuture<'a, ()>;

    /// Raw record of the interaction, published upstream as-is.
    fn raw(&self) -> serde_json::Value;

    /// Request as seen by user checks.
    fn request(&self) -> StateValue;

    /// Parsed response as seen by user checks; `None` before `invoke` or when
    /// no response was received.
    fn response(&self) -> Option<StateValue>;

    /// Next built-in check, in the model's fixed order.
    fn next_caller_check(&mut self) -> Option<CallerCheck>;
}

/// The API model driving a campaign.
pub trait Model: Send + Sync {
    /// Opaque description sent in the campaign descriptor.
    fn descriptor(&self) -> serde_json::Value;

    /// Build a caller for one Call directive.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Directive`](crate::AppError::Directive) when the
    /// call targets something this model does not know.
    fn new_caller(&self, call: &Call, sink: Arc<dyn ProgressSink>) -> Result<Box<dyn Caller>>;

    /// Resetter for a new campaign attempt.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`](crate::AppError::Config) when the
    /// resetter definition is invalid.
    fn resetter(&self) -> Result<Box<dyn Resetter>>;

    /// Validate `value` against the schema `schema_id`; returns the reasons it
    /// does not match.
    fn validate(&self, schema_id: u32, value: &serde_json::Value) -> Vec<String>;
}
