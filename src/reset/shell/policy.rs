//! Which lifecycle phases run for a given request.

use std::fmt::{Display, Formatter};

use crate::{AppError, Result};

/// One lifecycle script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Start the SUT.
    Start,
    /// Reset the SUT.
    Reset,
    /// Stop the SUT.
    Stop,
}

impl Phase {
    /// All phases, in materialization order.
    pub const ALL: [Phase; 3] = [Phase::Start, Phase::Reset, Phase::Stop];

    /// Lowercase phase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Reset => "reset",
            Self::Stop => "stop",
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The user's lifecycle scripts. Blank scripts count as undefined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellScripts {
    /// Start script.
    pub start: String,
    /// Reset script.
    pub reset: String,
    /// Stop script.
    pub stop: String,
}

impl ShellScripts {
    /// Script text for `phase`, or `None` when it is blank.
    #[must_use]
    pub fn get(&self, phase: Phase) -> Option<&str> {
        let text = match phase {
            Phase::Start => &self.start,
            Phase::Reset => &self.reset,
            Phase::Stop => &self.stop,
        };
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Whether `phase` has a script.
    #[must_use]
    pub fn has(&self, phase: Phase) -> bool {
        self.get(phase).is_some()
    }

    /// Whether no script at all is defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        Phase::ALL.iter().all(|p| !self.has(*p))
    }

    /// Phases to run for a reset request.
    ///
    /// | defined scripts      | first reset? | runs               |
    /// |----------------------|--------------|--------------------|
    /// | reset only           | either       | reset              |
    /// | start + reset + stop | yes          | start, then reset  |
    /// | start + reset + stop | no           | reset              |
    /// | start + stop         | yes          | start              |
    /// | start + stop         | no           | stop, then start   |
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for any other combination.
    pub fn plan_reset(&self, first_reset: bool) -> Result<Vec<Phase>> {
        let defined = (
            self.has(Phase::Start),
            self.has(Phase::Reset),
            self.has(Phase::Stop),
        );
        match (defined, first_reset) {
            ((false, true, false), _) => Ok(vec![Phase::Reset]),
            ((true, true, true), true) => Ok(vec![Phase::Start, Phase::Reset]),
            ((true, true, true), false) => Ok(vec![Phase::Reset]),
            ((true, false, true), true) => Ok(vec![Phase::Start]),
            ((true, false, true), false) => Ok(vec![Phase::Stop, Phase::Start]),
            ((start, reset, stop), _) => Err(AppError::Config(format!(
                "unsupported combination of lifecycle scripts (start: {}, reset: {}, stop: {}); \
                 define either reset alone, start and stop, or all three",
                defined_word(start),
                defined_word(reset),
                defined_word(stop),
            ))),
        }
    }

    /// Validate that the defined scripts form a supported combination.
    ///
    /// Having no script at all is accepted: such a resetter simply cannot
    /// reset.
    ///
    /// # Errors
    ///
    /// Same as [`ShellScripts::plan_reset`].
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        self.plan_reset(true).map(|_| ())
    }
}

fn defined_word(defined: bool) -> &'static str {
    if defined {
        "defined"
    } else {
        "empty"
    }
}
