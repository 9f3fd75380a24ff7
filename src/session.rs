//! Campaign session driver.
//!
//! One attempt walks the state machine
//!
//! ```text
//! INIT → AWAIT_DIRECTIVE → {EXECUTING_CALL | EXECUTING_RESET} → AWAIT_DIRECTIVE
//!      → … → RESULT_RECEIVED → {CONTINUE | DONE}
//! ```
//!
//! `CONTINUE` starts a fresh attempt on the same stream with the seed carried
//! by the result; `DONE` ends the session with a [`Verdict`]. The
//! orchestrator is the only source of continuation decisions, so no message
//! is ever retried.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::call::{CallExecutor, CallVerdict, DEFAULT_CALL_BUDGET};
use crate::caller::Model;
use crate::checks::CheckEngine;
use crate::models::campaign::CampaignDescriptor;
use crate::models::progress::FuzzingProgress;
use crate::models::protocol::{ClientMessage, FuzzingResult, ServerPayload};
use crate::reset::controller::ResetController;
use crate::reset::Resetter;
use crate::sink::ProgressSink;
use crate::transport::Transport;
use crate::{AppError, Result};

/// Default ceiling on waiting for the orchestrator's next message.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default ceiling on shrink continuations.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1000;

/// Position in the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Sending the campaign descriptor.
    Init,
    /// Waiting for the next server message.
    AwaitDirective,
    /// Running a `call` directive.
    ExecutingCall,
    /// Running a `reset` directive.
    ExecutingReset,
    /// The final result of the attempt arrived.
    ResultReceived,
    /// Another attempt follows with a new seed.
    Continue,
    /// The session is over.
    Done,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::AwaitDirective => "AWAIT_DIRECTIVE",
            Self::ExecutingCall => "EXECUTING_CALL",
            Self::ExecutingReset => "EXECUTING_RESET",
            Self::ResultReceived => "RESULT_RECEIVED",
            Self::Continue => "CONTINUE",
            Self::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Final disposition of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// No bug found.
    Success,
    /// A behavioral bug was found.
    Failure {
        /// Seed reproducing the failure.
        reproduction_seed: Vec<u8>,
    },
    /// The campaign failed while resets were failing; the failure may be an
    /// artifact of a broken lifecycle script.
    FailureDueToResetterError {
        /// Seed reproducing the failure.
        reproduction_seed: Vec<u8>,
    },
    /// The orchestrator will shrink but supplied no seed to continue with.
    Shrinking,
}

/// Tunables of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Ceiling on waiting for each server message.
    pub reply_timeout: Duration,
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Budget shared by all user checks of a call.
    pub call_budget: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            call_budget: DEFAULT_CALL_BUDGET,
        }
    }
}

enum AttemptEnd {
    Continue(Vec<u8>),
    Done(Verdict),
}

/// Drives a campaign over one orchestrator stream.
pub struct SessionDriver {
    model: Arc<dyn Model>,
    engine: CheckEngine,
    sink: Arc<dyn ProgressSink>,
    descriptor: CampaignDescriptor,
    options: SessionOptions,
    state: SessionState,
    attempts: u32,
}

impl SessionDriver {
    /// Create a driver. `descriptor` is sent at the start of every attempt,
    /// with the attempt's seed and the model's resetter filled in.
    #[must_use]
    pub fn new(
        model: Arc<dyn Model>,
        engine: CheckEngine,
        sink: Arc<dyn ProgressSink>,
        descriptor: CampaignDescriptor,
        options: SessionOptions,
    ) -> Self {
        Self {
            model,
            engine,
            sink,
            descriptor,
            options,
            state: SessionState::Init,
            attempts: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Attempts started so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Registered checks and their live state.
    #[must_use]
    pub fn engine(&self) -> &CheckEngine {
        &self.engine
    }

    /// Run attempts until the orchestrator stops asking for more.
    ///
    /// # Errors
    ///
    /// - `AppError::Transport` when the stream fails or a reply does not
    ///   arrive in time.
    /// - `AppError::Directive` for malformed messages, counters moving
    ///   backwards, or too many continuations.
    /// - `AppError::Cancelled` when `cancel` fires.
    /// - The first cleanup error when the attempt itself succeeded.
    pub async fn run(
        &mut self,
        transport: &mut Transport,
        cancel: &CancellationToken,
    ) -> Result<Verdict> {
        let mut seed = self.descriptor.seed.clone();
        loop {
            if self.attempts >= self.options.max_attempts {
                return Err(AppError::Directive(format!(
                    "campaign did not conclude within {} attempts",
                    self.options.max_attempts
                )));
            }
            self.attempts += 1;

            let span = info_span!("attempt", n = self.attempts);
            match self.attempt(transport, &seed, cancel).instrument(span).await? {
                AttemptEnd::Continue(next) => {
                    info!(attempt = self.attempts, "continuing campaign with a new seed");
                    seed = next;
                }
                AttemptEnd::Done(verdict) => {
                    info!(?verdict, attempts = self.attempts, "campaign finished");
                    return Ok(verdict);
                }
            }
        }
    }

    async fn attempt(
        &mut self,
        transport: &mut Transport,
        seed: &[u8],
        cancel: &CancellationToken,
    ) -> Result<AttemptEnd> {
        let mut resetter = match self.model.resetter() {
            Ok(resetter) => resetter,
            Err(err) => return finish(Err(err), [("sink", self.sink.terminate())]),
        };
        let mut descriptor = self.descriptor.with_seed(seed);
        descriptor.resetter = resetter.descriptor();

        let result = self
            .drive(transport, &descriptor, resetter.as_mut(), cancel)
            .await;

        // Cleanup runs even after cancellation; each stop phase is still
        // bounded by its own timeout.
        let terminated = resetter.terminate(&CancellationToken::new()).await;
        let flushed = self.sink.terminate();
        finish(result, [("resetter", terminated), ("sink", flushed)])
    }

    async fn drive(
        &mut self,
        transport: &mut Transport,
        descriptor: &CampaignDescriptor,
        resetter: &mut dyn Resetter,
        cancel: &CancellationToken,
    ) -> Result<AttemptEnd> {
        self.transition(SessionState::Init);
        transport
            .send(ClientMessage::Campaign(descriptor.clone()))
            .await?;

        let executor = CallExecutor::new(
            transport.outbound().clone(),
            Arc::clone(&self.sink),
            self.options.call_budget,
        );
        let mut controller = ResetController::new();
        let mut progress = FuzzingProgress::default();

        loop {
            self.transition(SessionState::AwaitDirective);
            let message = transport.receive_within(self.options.reply_timeout).await?;

            if let Some(update) = &message.progress {
                progress.apply(update)?;
                self.sink.progress(&progress);
            }

            match message.payload {
                ServerPayload::FuzzingReport(report) => {
                    debug!(max_tests = report.max_tests, "campaign header");
                    self.sink.report(&report);
                }
                ServerPayload::Call(call) => {
                    self.transition(SessionState::ExecutingCall);
                    let verdict = executor
                        .execute(self.model.as_ref(), &mut self.engine, &call, cancel)
                        .await?;
                    if verdict == CallVerdict::Failed {
                        debug!(endpoint = call.endpoint, "call failed");
                    }
                }
                ServerPayload::Reset => {
                    self.transition(SessionState::ExecutingReset);
                    match controller
                        .reset(transport.outbound(), resetter, &descriptor.env, cancel)
                        .await
                    {
                        Ok(()) => {}
                        Err(err) if err.is_fatal() => return Err(err),
                        Err(err) => debug!(%err, "reset failure reported upstream"),
                    }
                }
                ServerPayload::FuzzingResult(result) => {
                    self.transition(SessionState::ResultReceived);
                    let end = conclude(result, controller.had_reset_error());
                    self.transition(match end {
                        AttemptEnd::Continue(_) => SessionState::Continue,
                        AttemptEnd::Done(_) => SessionState::Done,
                    });
                    return Ok(end);
                }
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "session state");
        self.state = next;
    }
}

fn conclude(result: FuzzingResult, had_reset_error: bool) -> AttemptEnd {
    info!(
        success = result.success,
        tests = result.total_tests_count,
        calls = result.total_calls_count,
        checks = result.total_checks_count,
        will_shrink = result.will_shrink,
        "fuzzing result received"
    );
    if let Some(next) = result.next_seed {
        return AttemptEnd::Continue(next);
    }
    let verdict = if result.success {
        Verdict::Success
    } else if result.will_shrink {
        Verdict::Shrinking
    } else if had_reset_error {
        Verdict::FailureDueToResetterError {
            reproduction_seed: result.reproduction_seed,
        }
    } else {
        Verdict::Failure {
            reproduction_seed: result.reproduction_seed,
        }
    };
    AttemptEnd::Done(verdict)
}

/// Combine an attempt's result with its cleanup results: the attempt's own
/// error wins, then the first cleanup error; every other error is logged.
fn finish<T, const N: usize>(result: Result<T>, cleanup: [(&str, Result<()>); N]) -> Result<T> {
    let mut first = None;
    for (what, outcome) in cleanup {
        if let Err(err) = outcome {
            if result.is_ok() && first.is_none() {
                first = Some(err);
            } else {
                warn!(%err, what, "cleanup failed");
            }
        }
    }
    match first {
        Some(err) => Err(err),
        None => result,
    }
}
