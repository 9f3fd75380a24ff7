//! Reset lifecycle reporting.
//!
//! Wraps one [`Resetter::exec_reset`] invocation with `started` and
//! `ended`/`failed` progress messages, and remembers whether any reset of the
//! attempt failed so the final verdict can tell resetter trouble apart from a
//! genuine behavioral bug.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::models::campaign::EnvSnapshot;
use crate::models::protocol::{ClientMessage, ResetProgress, ResetStatus};
use crate::reset::Resetter;
use crate::transport::Outbound;
use crate::{AppError, Result};

/// Reports reset lifecycle status around a [`Resetter`].
#[derive(Debug, Default)]
pub struct ResetController {
    resets: u32,
    failures: u32,
}

impl ResetController {
    /// Create a controller for a fresh attempt.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any reset of this attempt failed.
    #[must_use]
    pub fn had_reset_error(&self) -> bool {
        self.failures > 0
    }

    /// Number of resets performed.
    #[must_use]
    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// Run one reset, reporting its lifecycle through `outbound`.
    ///
    /// # Errors
    ///
    /// - [`AppError::Transport`] when the `started` or `ended` message cannot
    ///   be sent (fatal).
    /// - The resetter's own error when the reset fails (non-fatal). Failing to
    ///   deliver the `failed` report is logged but does not replace it.
    pub async fn reset(
        &mut self,
        outbound: &Outbound,
        resetter: &mut dyn Resetter,
        env: &EnvSnapshot,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.resets += 1;
        let span = info_span!("reset", n = self.resets);

        async {
            outbound
                .send(ClientMessage::ResetProgress(ResetProgress {
                    status: ResetStatus::Started,
                    elapsed_ns: 0,
                    reason: Vec::new(),
                }))
                .await?;

            let started = Instant::now();
            let result = resetter.exec_reset(env, cancel).await;
            let elapsed_ns = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);

            match result {
                Ok(()) => {
                    info!(elapsed_ns, "reset ended");
                    outbound
                        .send(ClientMessage::ResetProgress(ResetProgress {
                            status: ResetStatus::Ended,
                            elapsed_ns,
                            reason: Vec::new(),
                        }))
                        .await
                }
                Err(err) => {
                    self.failures += 1;
                    warn!(%err, elapsed_ns, "reset failed");
                    let report = ClientMessage::ResetProgress(ResetProgress {
                        status: ResetStatus::Failed,
                        elapsed_ns,
                        reason: failure_reason(&err),
                    });
                    if let Err(send_err) = outbound.send(report).await {
                        warn!(%send_err, "could not report reset failure upstream");
                    }
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Reason lines for a failed reset: the captured script output tail when
/// there is one, the error text split on newlines otherwise.
#[must_use]
pub fn failure_reason(err: &AppError) -> Vec<String> {
    if let AppError::Reset {
        output_tail,
        message,
        ..
    } = err
    {
        if !output_tail.is_empty() {
            let mut reason = output_tail.clone();
            reason.push(message.clone());
            return reason;
        }
    }
    err.to_string().lines().map(str::to_owned).collect()
}
