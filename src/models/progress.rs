//! Fuzzing progress counters piggybacked on orchestrator messages.

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Counters describing how far the current attempt has progressed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct FuzzingProgress {
    /// Tests executed so far.
    #[serde(default)]
    pub total_tests_count: u32,
    /// Calls executed so far, across all tests.
    #[serde(default)]
    pub total_calls_count: u32,
    /// Checks executed so far, across all calls.
    #[serde(default)]
    pub total_checks_count: u32,
    /// Calls executed within the current test.
    #[serde(default)]
    pub test_calls_count: u32,
    /// Checks executed within the current call.
    #[serde(default)]
    pub call_checks_count: u32,
}

impl FuzzingProgress {
    /// Apply an update received from the orchestrator.
    ///
    /// Totals never decrease within one attempt. The per-test call counter may
    /// only go back down when a new test started, and the per-call check
    /// counter only when a new call started.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Directive` when the update would move a counter
    /// backwards; `self` is left untouched in that case.
    pub fn apply(&mut self, update: &FuzzingProgress) -> Result<()> {
        ensure_not_decreasing("total_tests_count", self.total_tests_count, update.total_tests_count)?;
        ensure_not_decreasing("total_calls_count", self.total_calls_count, update.total_calls_count)?;
        ensure_not_decreasing(
            "total_checks_count",
            self.total_checks_count,
            update.total_checks_count,
        )?;

        if update.total_tests_count == self.total_tests_count {
            ensure_not_decreasing("test_calls_count", self.test_calls_count, update.test_calls_count)?;
        }
        if update.total_calls_count == self.total_calls_count {
            ensure_not_decreasing("call_checks_count", self.call_checks_count, update.call_checks_count)?;
        }

        *self = *update;
        Ok(())
    }
}

fn ensure_not_decreasing(counter: &str, current: u32, next: u32) -> Result<()> {
    if next < current {
        return Err(AppError::Directive(format!(
            "progress counter {counter} went backwards: {current} -> {next}"
        )));
    }
    Ok(())
}
