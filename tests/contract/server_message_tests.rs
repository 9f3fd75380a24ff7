//! Contract tests for messages received from the orchestrator.

use serde_json::json;

use campaign_client::models::protocol::{ServerMessage, ServerPayload};
use campaign_client::transport::reader::parse_inbound_line;

fn parse(line: &str) -> ServerMessage {
    parse_inbound_line(line)
        .expect("valid server message")
        .expect("non-blank line")
}

#[test]
fn fuzzing_report_header() {
    let msg = parse(r#"{"kind":"fuzzing_report","max_tests":100,"is_shrinking":true,"seed":[1,2]}"#);
    let ServerPayload::FuzzingReport(report) = msg.payload else {
        panic!("expected report");
    };
    assert_eq!(report.max_tests, 100);
    assert!(report.is_shrinking);
    assert_eq!(report.seed, vec![1, 2]);
}

#[test]
fn call_directive_keeps_input_opaque() {
    let msg = parse(r#"{"kind":"call","endpoint":3,"input":{"body":{"name":"rex"},"query":[]}}"#);
    let ServerPayload::Call(call) = msg.payload else {
        panic!("expected call");
    };
    assert_eq!(call.endpoint, 3);
    assert_eq!(call.input, json!({"body": {"name": "rex"}, "query": []}));
}

#[test]
fn reset_directive_has_no_payload() {
    assert_eq!(parse(r#"{"kind":"reset"}"#).payload, ServerPayload::Reset);
}

#[test]
fn progress_is_piggybacked_on_any_message() {
    let msg = parse(
        r#"{"kind":"reset","progress":{"total_tests_count":2,"total_calls_count":7,"total_checks_count":30,"test_calls_count":1,"call_checks_count":0}}"#,
    );
    let progress = msg.progress.expect("progress present");
    assert_eq!(progress.total_tests_count, 2);
    assert_eq!(progress.total_checks_count, 30);
}

#[test]
fn final_result_without_next_seed() {
    let msg = parse(
        r#"{"kind":"fuzzing_result","success":false,"total_tests_count":5,"total_calls_count":12,"total_checks_count":40,"reproduction_seed":[9],"will_shrink":false}"#,
    );
    let ServerPayload::FuzzingResult(result) = msg.payload else {
        panic!("expected result");
    };
    assert!(!result.success);
    assert_eq!(result.reproduction_seed, vec![9]);
    assert!(result.next_seed.is_none());
}

#[test]
fn final_result_with_next_seed() {
    let msg = parse(r#"{"kind":"fuzzing_result","success":false,"will_shrink":true,"next_seed":[4,2]}"#);
    let ServerPayload::FuzzingResult(result) = msg.payload else {
        panic!("expected result");
    };
    assert_eq!(result.next_seed, Some(vec![4, 2]));
}

/// What the client builds in tests is what it parses in production.
#[test]
fn server_message_round_trips() {
    let original = ServerMessage::new(ServerPayload::Reset);
    let line = serde_json::to_string(&original).unwrap();
    assert_eq!(line, r#"{"kind":"reset"}"#);
    assert_eq!(parse(&line), original);
}
