//! Campaign descriptor sent to the orchestrator at the start of each attempt.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Captured environment variables, keyed by name.
pub type EnvSnapshot = BTreeMap<String, String>;

/// How the SUT is brought back to a known state between tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResetterDescriptor {
    /// No lifecycle management; the SUT is assumed to be running.
    Noop,
    /// Shell scripts executed through a persistent dispatcher.
    Shell {
        /// Script that starts the SUT.
        #[serde(default)]
        start: String,
        /// Script that resets the SUT between tests.
        #[serde(default)]
        reset: String,
        /// Script that stops the SUT.
        #[serde(default)]
        stop: String,
    },
}

/// Metadata about the client invocation that started the campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationMeta {
    /// Unique identifier of this client session.
    pub session_id: Uuid,
    /// Wall-clock time the session started.
    pub started_at: DateTime<Utc>,
    /// Version of this client.
    pub client_version: String,
    /// Command-line arguments the client was started with.
    #[serde(default)]
    pub argv: Vec<String>,
}

impl InvocationMeta {
    /// Capture metadata for the current process.
    #[must_use]
    pub fn capture() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            client_version: env!("CARGO_PKG_VERSION").to_owned(),
            argv: std::env::args().collect(),
        }
    }
}

/// Everything the orchestrator needs to plan a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignDescriptor {
    /// Endpoint ids selected for this campaign.
    pub endpoints: Vec<u32>,
    /// Environment snapshot shared with every lifecycle phase.
    #[serde(default)]
    pub env: EnvSnapshot,
    /// Opaque description of the API model.
    pub model: serde_json::Value,
    /// Resetter in use for this campaign.
    pub resetter: ResetterDescriptor,
    /// Random seed for this attempt.
    #[serde(default)]
    pub seed: Vec<u8>,
    /// Tags selecting which checks participate.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Invocation metadata.
    pub invocation: InvocationMeta,
}

impl CampaignDescriptor {
    /// Copy of this descriptor with a different seed, used on shrink
    /// continuation.
    #[must_use]
    pub fn with_seed(&self, seed: &[u8]) -> Self {
        Self {
            seed: seed.to_vec(),
            ..self.clone()
        }
    }
}

/// Capture the named environment variables from the current process.
///
/// Variables that are not set (or not valid unicode) are skipped.
#[must_use]
pub fn capture_env<S: AsRef<str>>(names: &[S]) -> EnvSnapshot {
    let mut snapshot = EnvSnapshot::new();
    for name in names {
        let name = name.as_ref();
        match std::env::var(name) {
            Ok(value) => {
                snapshot.insert(name.to_owned(), value);
            }
            Err(err) => debug!(name, %err, "environment variable not captured"),
        }
    }
    snapshot
}
