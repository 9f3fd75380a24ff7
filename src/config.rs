//! Engine configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::checks::{CheckLimits, TagFilter};
use crate::models::campaign::{capture_env, EnvSnapshot};
use crate::reset::shell::policy::ShellScripts;
use crate::session::SessionOptions;
use crate::{AppError, Result};

/// Orchestrator connection settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// `host:port` of the orchestrator.
    #[serde(default = "default_address")]
    pub address: String,
    /// Ceiling on waiting for each orchestrator message.
    #[serde(default = "default_reply_timeout_seconds")]
    pub reply_timeout_seconds: u64,
    /// Maximum number of attempts in one session, shrink continuations
    /// included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            reply_timeout_seconds: default_reply_timeout_seconds(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:7878".into()
}

fn default_reply_timeout_seconds() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    1000
}

/// Lifecycle scripts of the SUT.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ResetterConfig {
    /// Script starting the SUT.
    #[serde(default)]
    pub start: String,
    /// Script resetting the SUT between tests.
    #[serde(default)]
    pub reset: String,
    /// Script stopping the SUT.
    #[serde(default)]
    pub stop: String,
    /// Timeout of each phase.
    #[serde(default = "default_phase_timeout_seconds")]
    pub phase_timeout_seconds: u64,
    /// Environment variables captured at startup and re-declared read-only
    /// in every phase.
    #[serde(default)]
    pub env: Vec<String>,
}

impl Default for ResetterConfig {
    fn default() -> Self {
        Self {
            start: String::new(),
            reset: String::new(),
            stop: String::new(),
            phase_timeout_seconds: default_phase_timeout_seconds(),
            env: Vec::new(),
        }
    }
}

fn default_phase_timeout_seconds() -> u64 {
    120
}

/// Limits applied to user checks.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ChecksConfig {
    /// Maximum execution steps per hook run.
    #[serde(default = "default_step_budget")]
    pub step_budget: u64,
    /// Budget shared by all user checks of one call.
    #[serde(default = "default_call_budget_millis")]
    pub call_budget_millis: u64,
    /// Timeout of a single hook run.
    #[serde(default = "default_check_timeout_millis")]
    pub check_timeout_millis: u64,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            step_budget: default_step_budget(),
            call_budget_millis: default_call_budget_millis(),
            check_timeout_millis: default_check_timeout_millis(),
        }
    }
}

fn default_step_budget() -> u64 {
    100_000
}

fn default_call_budget_millis() -> u64 {
    10_000
}

fn default_check_timeout_millis() -> u64 {
    3_000
}

/// Tag selection of user checks.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TagsConfig {
    /// When non-empty, only checks carrying one of these tags run.
    #[serde(default)]
    pub include: Vec<String>,
    /// Checks carrying any of these tags never run.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Engine configuration parsed from `campaign.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Orchestrator connection.
    #[serde(default)]
    pub server: ServerConfig,
    /// SUT lifecycle scripts.
    #[serde(default)]
    pub resetter: ResetterConfig,
    /// User check limits.
    #[serde(default)]
    pub checks: ChecksConfig,
    /// Check tag selection.
    #[serde(default)]
    pub tags: TagsConfig,
}

impl EngineConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        debug!(path = %path.display(), "configuration loaded");
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Session tunables.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            reply_timeout: Duration::from_secs(self.server.reply_timeout_seconds),
            max_attempts: self.server.max_attempts,
            call_budget: Duration::from_millis(self.checks.call_budget_millis),
        }
    }

    /// Per-hook limits.
    #[must_use]
    pub fn check_limits(&self) -> CheckLimits {
        CheckLimits {
            step_budget: self.checks.step_budget,
            check_timeout: Duration::from_millis(self.checks.check_timeout_millis),
        }
    }

    /// Tag filter built from `[tags]`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an illegal tag or a tag both included
    /// and excluded.
    pub fn tag_filter(&self) -> Result<TagFilter> {
        TagFilter::new(self.tags.include.iter().cloned(), self.tags.exclude.iter().cloned())
    }

    /// Lifecycle scripts from `[resetter]`.
    #[must_use]
    pub fn shell_scripts(&self) -> ShellScripts {
        ShellScripts {
            start: self.resetter.start.clone(),
            reset: self.resetter.reset.clone(),
            stop: self.resetter.stop.clone(),
        }
    }

    /// Timeout of each lifecycle phase.
    #[must_use]
    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.resetter.phase_timeout_seconds)
    }

    /// Snapshot of the environment variables named in `[resetter] env`.
    #[must_use]
    pub fn capture_env(&self) -> EnvSnapshot {
        capture_env(&self.resetter.env)
    }

    fn validate(&self) -> Result<()> {
        if self.server.address.trim().is_empty() {
            return Err(AppError::Config("server.address must not be empty".into()));
        }
        if self.server.reply_timeout_seconds == 0 {
            return Err(AppError::Config(
                "server.reply_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.server.max_attempts == 0 {
            return Err(AppError::Config(
                "server.max_attempts must be greater than zero".into(),
            ));
        }
        if self.resetter.phase_timeout_seconds == 0 {
            return Err(AppError::Config(
                "resetter.phase_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.checks.step_budget == 0 {
            return Err(AppError::Config(
                "checks.step_budget must be greater than zero".into(),
            ));
        }
        if self.checks.call_budget_millis == 0 || self.checks.check_timeout_millis == 0 {
            return Err(AppError::Config(
                "checks.call_budget_millis and checks.check_timeout_millis must be greater than zero"
                    .into(),
            ));
        }

        self.shell_scripts().validate()?;
        self.tag_filter()?;
        Ok(())
    }
}
