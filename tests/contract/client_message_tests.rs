//! Contract tests for messages sent to the orchestrator.
//!
//! The orchestrator parses these lines; field names, `kind` tags and status
//! spellings are part of the protocol.

use serde_json::{json, Value};

use campaign_client::checks::CheckOutcome;
use campaign_client::models::protocol::{
    CallResponseRaw, CallResponseVerified, CallVerifProgress, CheckOrigin, ClientMessage,
    ResetProgress, ResetStatus,
};
use campaign_client::transport::writer::encode_outbound;

fn wire(msg: &ClientMessage) -> Value {
    let bytes = encode_outbound(msg).expect("encodable");
    assert_eq!(bytes.last(), Some(&b'\n'), "every message is one line");
    assert_eq!(
        bytes.iter().filter(|b| **b == b'\n').count(),
        1,
        "no embedded newlines"
    );
    serde_json::from_slice(&bytes).expect("valid json")
}

#[test]
fn call_response_raw_wire_shape() {
    let msg = ClientMessage::CallResponseRaw(CallResponseRaw {
        raw: json!({"status": 500, "body": "oops\nline"}),
    });
    assert_eq!(
        wire(&msg),
        json!({"kind": "call_response_raw", "raw": {"status": 500, "body": "oops\nline"}})
    );
}

#[test]
fn call_response_verified_wire_shape() {
    let msg = ClientMessage::CallResponseVerified(CallResponseVerified {
        response: json!({"id": 1}),
    });
    assert_eq!(
        wire(&msg),
        json!({"kind": "call_response_verified", "response": {"id": 1}})
    );
}

#[test]
fn check_start_wire_shape() {
    let msg = ClientMessage::CallVerifProgress(CallVerifProgress::start(
        "no-5xx",
        CheckOrigin::BuiltIn,
        false,
    ));
    assert_eq!(
        wire(&msg),
        json!({
            "kind": "call_verif_progress",
            "name": "no-5xx",
            "origin": "built_in",
            "status": "start",
            "elapsed_ns": 0,
            "execution_steps": 0,
            "user_property": false
        })
    );
}

#[test]
fn failed_check_carries_reason_lines() {
    let outcome = CheckOutcome::built_in(
        "status-code",
        vec!["expected 200".into(), "got 503".into()],
        std::time::Duration::from_millis(2),
    );
    let value = wire(&ClientMessage::CallVerifProgress(outcome.to_progress()));

    assert_eq!(value["status"], "failure");
    assert_eq!(value["reason"], json!(["expected 200", "got 503"]));
    assert_eq!(value["elapsed_ns"], 2_000_000);
}

#[test]
fn done_signal_wire_shape() {
    let value = wire(&ClientMessage::CallVerifProgress(CallVerifProgress::done()));
    assert_eq!(value["kind"], "call_verif_progress");
    assert_eq!(value["status"], "done");
}

#[test]
fn user_check_origins_are_snake_case() {
    for (origin, text) in [
        (CheckOrigin::BeforeRequest, "before_request"),
        (CheckOrigin::AfterResponse, "after_response"),
    ] {
        let value = wire(&ClientMessage::CallVerifProgress(CallVerifProgress::start(
            "c", origin, true,
        )));
        assert_eq!(value["origin"], text);
        assert_eq!(value["user_property"], true);
    }
}

#[test]
fn reset_progress_wire_shapes() {
    for (status, text) in [
        (ResetStatus::Started, "started"),
        (ResetStatus::Ended, "ended"),
        (ResetStatus::Failed, "failed"),
    ] {
        let value = wire(&ClientMessage::ResetProgress(ResetProgress {
            status,
            elapsed_ns: 5,
            reason: Vec::new(),
        }));
        assert_eq!(value["kind"], "reset_progress");
        assert_eq!(value["status"], text);
        assert!(value.get("reason").is_none(), "empty reason is omitted");
    }
}
