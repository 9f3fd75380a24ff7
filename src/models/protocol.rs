//! Session protocol messages exchanged with the orchestrator.
//!
//! Every message travels as one line of JSON. Both directions are serde enums
//! tagged by a `kind` field:
//!
//! | Direction | `kind`                   | Payload                     |
//! |-----------|--------------------------|-----------------------------|
//! | client →  | `campaign`               | [`CampaignDescriptor`]      |
//! | client →  | `call_response_raw`      | [`CallResponseRaw`]         |
//! | client →  | `call_response_verified` | [`CallResponseVerified`]    |
//! | client →  | `call_verif_progress`    | [`CallVerifProgress`]       |
//! | client →  | `reset_progress`         | [`ResetProgress`]           |
//! | ← server  | `fuzzing_report`         | [`FuzzingReport`]           |
//! | ← server  | `call`                   | [`Call`]                    |
//! | ← server  | `reset`                  | *(none)*                    |
//! | ← server  | `fuzzing_result`         | [`FuzzingResult`]           |
//!
//! Server messages may additionally carry a piggybacked `progress` object.

use serde::{Deserialize, Serialize};

use crate::models::campaign::CampaignDescriptor;
use crate::models::progress::FuzzingProgress;

// ── Client → server ───────────────────────────────────────────────────────────

/// Message sent by this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start (or continue) a campaign.
    Campaign(CampaignDescriptor),
    /// Raw interaction as performed against the SUT.
    CallResponseRaw(CallResponseRaw),
    /// Parsed response, published once built-in checks passed.
    CallResponseVerified(CallResponseVerified),
    /// Lifecycle of one check of the current call.
    CallVerifProgress(CallVerifProgress),
    /// Lifecycle of the current reset.
    ResetProgress(ResetProgress),
}

/// Raw interaction data produced by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResponseRaw {
    /// Opaque interaction record owned by the model.
    pub raw: serde_json::Value,
}

/// Parsed response structure of a verified call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResponseVerified {
    /// Response as understood by the model.
    pub response: serde_json::Value,
}

/// Where a check comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOrigin {
    /// Supplied by the model (connectivity, status codes, schema...).
    BuiltIn,
    /// User hook run before the request is sent.
    BeforeRequest,
    /// User hook run after the response is received.
    AfterResponse,
}

/// Check lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifStatus {
    /// The check is about to run.
    Start,
    /// The check passed and changed (or asserted on) something.
    Success,
    /// The check ran but had nothing to say.
    Skipped,
    /// The check failed; the call is failed.
    Failure,
    /// Every check of the call passed.
    Done,
}

/// Progress of one check (or the terminal signal of a call).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallVerifProgress {
    /// Check name; empty for the terminal `done` signal.
    #[serde(default)]
    pub name: String,
    /// Where the check comes from.
    pub origin: CheckOrigin,
    /// Lifecycle status.
    pub status: VerifStatus,
    /// Failure reason lines.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reason: Vec<String>,
    /// Time spent running the check.
    #[serde(default)]
    pub elapsed_ns: u64,
    /// Hook execution steps consumed.
    #[serde(default)]
    pub execution_steps: u64,
    /// Whether the check is user-defined.
    #[serde(default)]
    pub user_property: bool,
}

impl CallVerifProgress {
    /// A `start` notification for the named check.
    #[must_use]
    pub fn start(name: &str, origin: CheckOrigin, user_property: bool) -> Self {
        Self {
            name: name.to_owned(),
            origin,
            status: VerifStatus::Start,
            reason: Vec::new(),
            elapsed_ns: 0,
            execution_steps: 0,
            user_property,
        }
    }

    /// The terminal signal emitted once every check of a call passed.
    #[must_use]
    pub fn done() -> Self {
        Self {
            name: String::new(),
            origin: CheckOrigin::BuiltIn,
            status: VerifStatus::Done,
            reason: Vec::new(),
            elapsed_ns: 0,
            execution_steps: 0,
            user_property: false,
        }
    }
}

/// Reset lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetStatus {
    /// The reset is about to run.
    Started,
    /// The reset completed.
    Ended,
    /// The reset failed.
    Failed,
}

/// Progress of one reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetProgress {
    /// Lifecycle status.
    pub status: ResetStatus,
    /// Time spent resetting; zero for `started`.
    #[serde(default)]
    pub elapsed_ns: u64,
    /// Failure reason lines.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reason: Vec<String>,
}

// ── Server → client ───────────────────────────────────────────────────────────

/// Message received from the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Counters piggybacked on the message, applied before dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<FuzzingProgress>,
    /// The message itself.
    #[serde(flatten)]
    pub payload: ServerPayload,
}

impl ServerMessage {
    /// Wrap a payload with no piggybacked progress.
    #[must_use]
    pub fn new(payload: ServerPayload) -> Self {
        Self {
            progress: None,
            payload,
        }
    }

    /// Attach piggybacked progress counters.
    #[must_use]
    pub fn with_progress(mut self, progress: FuzzingProgress) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Tagged payload of a server message. `Call` and `Reset` are directives,
/// each consumed exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerPayload {
    /// Campaign header.
    FuzzingReport(FuzzingReport),
    /// Perform one interaction.
    Call(Call),
    /// Bring the SUT back to a known state.
    Reset,
    /// Final verdict of the attempt.
    FuzzingResult(FuzzingResult),
}

/// Campaign header sent by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzingReport {
    /// Number of tests the orchestrator intends to run.
    pub max_tests: u32,
    /// Whether this attempt is shrinking a previous failure.
    #[serde(default)]
    pub is_shrinking: bool,
    /// Seed in use for this attempt.
    #[serde(default)]
    pub seed: Vec<u8>,
}

/// One interaction to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Endpoint being exercised.
    pub endpoint: u32,
    /// Generated input, interpreted by the model.
    pub input: serde_json::Value,
}

/// Final result of an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzingResult {
    /// No bug found.
    pub success: bool,
    /// Tests executed.
    #[serde(default)]
    pub total_tests_count: u32,
    /// Calls executed.
    #[serde(default)]
    pub total_calls_count: u32,
    /// Checks executed.
    #[serde(default)]
    pub total_checks_count: u32,
    /// Seed reproducing the failure, when one was found.
    #[serde(default)]
    pub reproduction_seed: Vec<u8>,
    /// Whether the orchestrator wants to shrink the failure.
    #[serde(default)]
    pub will_shrink: bool,
    /// Seed for the next attempt, when the campaign continues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_seed: Option<Vec<u8>>,
}
