//! Error types shared across the engine.

use std::fmt::{Display, Formatter};

/// Shared engine result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Engine error enumeration covering all failure modes of a campaign.
#[derive(Debug)]
pub enum AppError {
    /// Configuration or check/resetter definition rejected at load time.
    Config(String),
    /// Session stream failure; always fatal to the session.
    Transport(String),
    /// Malformed or unexpected message from the orchestrator; fatal.
    Directive(String),
    /// Assertion or hook failure local to a single check.
    Check(String),
    /// Lifecycle script failure local to a single reset.
    Reset {
        /// Phase that failed (`start`, `reset`, `stop`).
        phase: String,
        /// Exit code reported by the dispatcher, if one was received.
        exit_code: Option<i32>,
        /// Human-readable failure summary.
        message: String,
        /// Last lines of script output captured while the phase ran.
        output_tail: Vec<String>,
    },
    /// File-system or I/O operation failure.
    Io(String),
    /// The operation was abandoned because its context was cancelled.
    Cancelled(String),
}

impl AppError {
    /// Build a [`AppError::Reset`] carrying no captured output.
    #[must_use]
    pub fn reset(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Reset {
            phase: phase.into(),
            exit_code: None,
            message: message.into(),
            output_tail: Vec::new(),
        }
    }

    /// Whether this error terminates the session loop.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Directive(_) | Self::Io(_) | Self::Cancelled(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Directive(msg) => write!(f, "directive: {msg}"),
            Self::Check(msg) => write!(f, "check: {msg}"),
            Self::Reset {
                phase,
                exit_code: Some(code),
                message,
                ..
            } => write!(f, "reset: {phase} exited with code {code}: {message}"),
            Self::Reset { phase, message, .. } => write!(f, "reset: {phase}: {message}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Directive(format!("malformed json: {err}"))
    }
}
