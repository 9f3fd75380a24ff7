//! Unit tests for session line framing, inbound parsing and the reader task.
//!
//! Covers:
//! - single and batched lines decode independently
//! - partial delivery is buffered until the newline
//! - oversized lines are a transport error
//! - blank lines are skipped
//! - malformed JSON and unknown kinds are directive errors
//! - the reader forwards the error and stops on a malformed line

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;

use campaign_client::models::protocol::ServerPayload;
use campaign_client::transport::codec::{FrameCodec, MAX_LINE_BYTES};
use campaign_client::transport::reader::{parse_inbound_line, run_reader};
use campaign_client::AppError;

// ── Framing ──────────────────────────────────────────────────────────────────

#[test]
fn batched_lines_are_each_decoded() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("{\"kind\":\"reset\"}\n{\"kind\":\"reset\"}\n");

    assert!(codec.decode(&mut buf).expect("first").is_some());
    assert!(codec.decode(&mut buf).expect("second").is_some());
    assert!(codec.decode(&mut buf).expect("empty").is_none());
}

#[test]
fn partial_line_is_buffered_until_newline() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("{\"kind\":");

    assert!(codec.decode(&mut buf).expect("partial").is_none());

    buf.extend_from_slice(b"\"reset\"}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("complete"),
        Some("{\"kind\":\"reset\"}".to_owned())
    );
}

/// A line longer than the limit is a transport error, never an allocation
/// without bound.
#[test]
fn oversized_line_is_transport_error() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_BYTES + 1].as_slice());

    let err = codec.decode(&mut buf).expect_err("line too long");
    assert!(matches!(err, AppError::Transport(ref msg) if msg.starts_with("line too long")));
}

// ── Parsing ──────────────────────────────────────────────────────────────────

#[test]
fn blank_line_is_skipped() {
    assert!(parse_inbound_line("   ").expect("blank").is_none());
}

#[test]
fn call_with_piggybacked_progress_parses() {
    let msg = parse_inbound_line(
        r#"{"kind":"call","endpoint":4,"input":{"q":1},"progress":{"total_calls_count":2}}"#,
    )
    .expect("valid")
    .expect("non-blank");

    assert_eq!(msg.progress.map(|p| p.total_calls_count), Some(2));
    assert!(matches!(msg.payload, ServerPayload::Call(ref call) if call.endpoint == 4));
}

#[test]
fn unknown_kind_is_directive_error() {
    let err = parse_inbound_line(r#"{"kind":"explode"}"#).expect_err("unknown kind");
    assert!(matches!(err, AppError::Directive(_)));
}

#[test]
fn malformed_json_is_directive_error() {
    let err = parse_inbound_line("{not json").expect_err("malformed");
    assert!(matches!(err, AppError::Directive(ref msg) if msg.starts_with("malformed json")));
}

// ── Reader task ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn reader_forwards_messages_then_stops_on_malformed_line() {
    let (client, mut server) = tokio::io::duplex(1024);
    let (tx, mut rx) = mpsc::channel(8);
    let task = tokio::spawn(run_reader(client, tx, CancellationToken::new()));

    server
        .write_all(b"{\"kind\":\"reset\"}\n\n{oops\n{\"kind\":\"reset\"}\n")
        .await
        .unwrap();

    let first = rx.recv().await.expect("first item").expect("valid message");
    assert_eq!(first.payload, ServerPayload::Reset);

    let second = rx.recv().await.expect("second item");
    assert!(matches!(second, Err(AppError::Directive(_))));

    assert!(rx.recv().await.is_none(), "reader stops after a malformed line");
    task.await.unwrap();
}

#[tokio::test]
async fn reader_closes_channel_on_eof() {
    let (client, server) = tokio::io::duplex(64);
    let (tx, mut rx) = mpsc::channel(8);
    let task = tokio::spawn(run_reader(client, tx, CancellationToken::new()));

    drop(server);
    assert!(rx.recv().await.is_none());
    task.await.unwrap();
}
