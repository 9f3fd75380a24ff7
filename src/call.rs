//! Execution of one `call` directive.
//!
//! The pipeline is strictly sequential and stops at the first failure:
//!
//! 1. `before_request` user checks against the prepared request;
//! 2. the live interaction, published raw;
//! 3. the model's built-in checks, each reported `start` then its outcome;
//! 4. the parsed response, published as verified;
//! 5. `after_response` user checks;
//! 6. the terminal `done` signal.
//!
//! All user checks of a call share one deadline. Checks that never started
//! because the deadline passed are not reported.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::caller::{Caller, Model};
use crate::checks::{CheckEngine, CheckOutcome, HookKind, OutcomeStatus};
use crate::models::protocol::{
    Call, CallResponseRaw, CallResponseVerified, CallVerifProgress, CheckOrigin, ClientMessage,
};
use crate::models::value::StateValue;
use crate::sink::ProgressSink;
use crate::transport::Outbound;
use crate::{AppError, Result};

/// Default budget shared by all user checks of one call.
pub const DEFAULT_CALL_BUDGET: Duration = Duration::from_secs(10);

/// How a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallVerdict {
    /// Every check passed and `done` was sent.
    Passed,
    /// A check failed, or the call ran out of time.
    Failed,
}

enum ChecksRun {
    Passed,
    Failed,
}

/// Runs `call` directives against the SUT.
pub struct CallExecutor {
    outbound: Outbound,
    sink: Arc<dyn ProgressSink>,
    call_budget: Duration,
}

impl CallExecutor {
    /// Create an executor publishing through `outbound`.
    #[must_use]
    pub fn new(outbound: Outbound, sink: Arc<dyn ProgressSink>, call_budget: Duration) -> Self {
        Self {
            outbound,
            sink,
            call_budget,
        }
    }

    /// Run one call through the whole verification pipeline.
    ///
    /// Check failures are reported upstream and turn into
    /// [`CallVerdict::Failed`]; they are not errors.
    ///
    /// # Errors
    ///
    /// - `AppError::Directive` when the model rejects the call.
    /// - `AppError::Transport` when a progress message cannot be sent.
    /// - `AppError::Cancelled` when `cancel` fires.
    pub async fn execute(
        &self,
        model: &dyn Model,
        engine: &mut CheckEngine,
        call: &Call,
        cancel: &CancellationToken,
    ) -> Result<CallVerdict> {
        let span = info_span!("call", endpoint = call.endpoint);
        self.pipeline(model, engine, call, cancel)
            .instrument(span)
            .await
    }

    async fn pipeline(
        &self,
        model: &dyn Model,
        engine: &mut CheckEngine,
        call: &Call,
        cancel: &CancellationToken,
    ) -> Result<CallVerdict> {
        let deadline = Instant::now() + self.call_budget;
        let mut caller = model.new_caller(call, Arc::clone(&self.sink))?;
        let request = caller.request();

        if let ChecksRun::Failed = self
            .user_checks(engine, HookKind::BeforeRequest, &request, None, deadline, cancel)
            .await?
        {
            return Ok(CallVerdict::Failed);
        }

        caller.invoke(cancel).await;
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled("call interrupted".into()));
        }
        self.outbound
            .send(ClientMessage::CallResponseRaw(CallResponseRaw { raw: caller.raw() }))
            .await?;

        if let ChecksRun::Failed = self.built_in_checks(caller.as_mut()).await? {
            return Ok(CallVerdict::Failed);
        }

        let response = caller.response();
        self.outbound
            .send(ClientMessage::CallResponseVerified(CallResponseVerified {
                response: published_response(response.as_ref()),
            }))
            .await?;

        if let ChecksRun::Failed = self
            .user_checks(
                engine,
                HookKind::AfterResponse,
                &request,
                response.as_ref(),
                deadline,
                cancel,
            )
            .await?
        {
            return Ok(CallVerdict::Failed);
        }

        self.outbound
            .send(ClientMessage::CallVerifProgress(CallVerifProgress::done()))
            .await?;
        debug!("call passed");
        Ok(CallVerdict::Passed)
    }

    async fn built_in_checks(&self, caller: &mut dyn Caller) -> Result<ChecksRun> {
        while let Some(check) = caller.next_caller_check() {
            self.outbound
                .send(ClientMessage::CallVerifProgress(CallVerifProgress::start(
                    &check.name,
                    CheckOrigin::BuiltIn,
                    false,
                )))
                .await?;

            let started = Instant::now();
            let reason = catch_unwind(AssertUnwindSafe(check.run))
                .unwrap_or_else(|_| vec![format!("built-in check {} panicked", check.name)]);
            let outcome = CheckOutcome::built_in(&check.name, reason, started.elapsed());

            self.report(&outcome).await?;
            if outcome.is_failure() {
                return Ok(ChecksRun::Failed);
            }
        }
        Ok(ChecksRun::Passed)
    }

    async fn user_checks(
        &self,
        engine: &mut CheckEngine,
        kind: HookKind,
        request: &StateValue,
        response: Option<&StateValue>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<ChecksRun> {
        for index in engine.active(kind) {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled("call checks interrupted".into()));
            }
            if Instant::now() >= deadline {
                warn!(?kind, "call budget exhausted, remaining checks not run");
                return Ok(ChecksRun::Failed);
            }

            let name = engine.name(index).unwrap_or_default().to_owned();
            self.outbound
                .send(ClientMessage::CallVerifProgress(CallVerifProgress::start(
                    &name,
                    kind.origin(),
                    true,
                )))
                .await?;

            let outcome = engine.run(index, request, response, deadline, cancel, &*self.sink)?;
            self.report(&outcome).await?;

            if outcome.abandoned && cancel.is_cancelled() {
                return Err(AppError::Cancelled(format!("check {name} interrupted")));
            }
            if outcome.is_failure() {
                return Ok(ChecksRun::Failed);
            }
        }
        Ok(ChecksRun::Passed)
    }

    async fn report(&self, outcome: &CheckOutcome) -> Result<()> {
        match outcome.status {
            OutcomeStatus::Success => self.sink.check_passed(),
            OutcomeStatus::Skipped => self.sink.check_skipped(),
            OutcomeStatus::Failure => self.sink.check_failed(&outcome.reason),
        }
        debug!(check = %outcome.name, status = ?outcome.status, "check finished");
        self.outbound
            .send(ClientMessage::CallVerifProgress(outcome.to_progress()))
            .await
    }
}

fn published_response(response: Option<&StateValue>) -> serde_json::Value {
    let Some(response) = response else {
        return serde_json::Value::Null;
    };
    serde_json::to_value(response).unwrap_or_else(|err| {
        warn!(%err, "response is not a literal tree, publishing null");
        serde_json::Value::Null
    })
}
