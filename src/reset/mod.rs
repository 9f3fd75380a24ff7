//! SUT lifecycle management.
//!
//! The [`Resetter`] trait decouples the session driver from how the SUT is
//! started, reset and stopped.
//! - `controller`: reports reset lifecycle status upstream.
//! - `shell`: persistent-shell implementation driven by user scripts.

pub mod controller;
pub mod shell;

use tokio_util::sync::CancellationToken;

use crate::caller::BoxFuture;
use crate::models::campaign::{EnvSnapshot, ResetterDescriptor};
use crate::Result;

/// Brings the SUT to a known state.
pub trait Resetter: Send {
    /// Descriptor sent in the campaign descriptor.
    fn descriptor(&self) -> ResetterDescriptor;

    /// Start the SUT.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Reset`](crate::AppError::Reset) when the phase
    /// fails, [`AppError::Config`](crate::AppError::Config) when it is not
    /// defined.
    fn exec_start<'a>(
        &'a mut self,
        env: &'a EnvSnapshot,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>>;

    /// Reset the SUT between tests, starting it first when needed.
    ///
    /// # Errors
    ///
    /// Same as [`Resetter::exec_start`].
    fn exec_reset<'a>(
        &'a mut self,
        env: &'a EnvSnapshot,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>>;

    /// Stop the SUT.
    ///
    /// # Errors
    ///
    /// Same as [`Resetter::exec_start`].
    fn exec_stop<'a>(
        &'a mut self,
        env: &'a EnvSnapshot,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>>;

    /// Release every resource held by this resetter.
    ///
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first error met while tearing down.
    fn terminate<'a>(&'a mut self, cancel: &'a CancellationToken) -> BoxFuture<'a, Result<()>>;
}

/// Resetter for SUTs that need no lifecycle management.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResetter;

impl Resetter for NoopResetter {
    fn descriptor(&self) -> ResetterDescriptor {
        ResetterDescriptor::Noop
    }

    fn exec_start<'a>(
        &'a mut self,
        _env: &'a EnvSnapshot,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn exec_reset<'a>(
        &'a mut self,
        _env: &'a EnvSnapshot,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn exec_stop<'a>(
        &'a mut self,
        _env: &'a EnvSnapshot,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn terminate<'a>(&'a mut self, _cancel: &'a CancellationToken) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
