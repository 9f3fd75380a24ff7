//! Progress reporting surface.
//!
//! Terminal rendering lives outside this crate; the engine only talks to a
//! [`ProgressSink`]. [`TracingSink`] is the default implementation and turns
//! every notification into a structured log event.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{info, warn};

use crate::models::progress::FuzzingProgress;
use crate::models::protocol::FuzzingReport;
use crate::Result;

/// Receives progress notifications from every engine component.
///
/// Implementations are shared between the driving task and the shell output
/// demultiplexers, hence `&self` everywhere.
pub trait ProgressSink: Send + Sync {
    /// Campaign header received.
    fn report(&self, report: &FuzzingReport);

    /// Counters updated by the orchestrator.
    fn progress(&self, progress: &FuzzingProgress);

    /// A check passed.
    fn check_passed(&self);

    /// A check ran but was skipped.
    fn check_skipped(&self);

    /// A check failed with the given reason lines.
    fn check_failed(&self, reason: &[String]);

    /// Informational output (script output, hook prints, notices).
    fn printf(&self, message: &str);

    /// Error output.
    fn errorf(&self, message: &str);

    /// The attempt is over; flush whatever needs flushing.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn terminate(&self) -> Result<()>;
}

/// [`ProgressSink`] that logs through `tracing` and tallies check outcomes.
#[derive(Debug, Default)]
pub struct TracingSink {
    passed: AtomicU32,
    skipped: AtomicU32,
    failed: AtomicU32,
}

impl TracingSink {
    /// Create a sink with zeroed tallies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `(passed, skipped, failed)` tallies since the last terminate.
    #[must_use]
    pub fn tallies(&self) -> (u32, u32, u32) {
        (
            self.passed.load(Ordering::Relaxed),
            self.skipped.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

impl ProgressSink for TracingSink {
    fn report(&self, report: &FuzzingReport) {
        info!(
            max_tests = report.max_tests,
            is_shrinking = report.is_shrinking,
            "campaign header received"
        );
    }

    fn progress(&self, progress: &FuzzingProgress) {
        info!(
            tests = progress.total_tests_count,
            calls = progress.total_calls_count,
            checks = progress.total_checks_count,
            "progress"
        );
    }

    fn check_passed(&self) {
        self.passed.fetch_add(1, Ordering::Relaxed);
    }

    fn check_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn check_failed(&self, reason: &[String]) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        warn!(reason = %reason.join("\n"), "check failed");
    }

    fn printf(&self, message: &str) {
        info!(target: "campaign_client::output", "{message}");
    }

    fn errorf(&self, message: &str) {
        warn!(target: "campaign_client::output", "{message}");
    }

    fn terminate(&self) -> Result<()> {
        let (passed, skipped, failed) = self.tallies();
        info!(passed, skipped, failed, "checks summary");
        self.passed.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        Ok(())
    }
}
