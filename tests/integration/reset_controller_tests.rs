//! Integration tests for reset lifecycle reporting.

use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;

use campaign_client::caller::Model;
use campaign_client::models::campaign::EnvSnapshot;
use campaign_client::models::protocol::{ClientMessage, ResetStatus};
use campaign_client::reset::controller::{failure_reason, ResetController};
use campaign_client::AppError;

use super::test_helpers::{collect, outbound_pair, FakeModel};

fn statuses(messages: &[ClientMessage]) -> Vec<ResetStatus> {
    messages
        .iter()
        .filter_map(|m| match m {
            ClientMessage::ResetProgress(p) => Some(p.status),
            _ => None,
        })
        .collect()
}

/// A successful reset is bracketed by `started` and `ended`.
#[tokio::test]
async fn successful_reset_reports_started_then_ended() {
    let (outbound, mut rx) = outbound_pair();
    let model = FakeModel::passing();
    let mut resetter = model.resetter().expect("resetter");
    let mut controller = ResetController::new();

    controller
        .reset(&outbound, resetter.as_mut(), &EnvSnapshot::new(), &CancellationToken::new())
        .await
        .expect("reset succeeds");

    assert_eq!(
        statuses(&collect(&mut rx)),
        vec![ResetStatus::Started, ResetStatus::Ended]
    );
    assert!(!controller.had_reset_error());
    assert_eq!(controller.resets(), 1);
    assert_eq!(model.resets.load(Ordering::SeqCst), 1);
}

/// A failed reset is reported with the script output tail and remembered.
#[tokio::test]
async fn failed_reset_reports_reason_and_is_remembered() {
    let (outbound, mut rx) = outbound_pair();
    let model = FakeModel::passing();
    model.fail_next_reset("script failed");
    let mut resetter = model.resetter().expect("resetter");
    let mut controller = ResetController::new();
    let env = EnvSnapshot::new();
    let cancel = CancellationToken::new();

    let err = controller
        .reset(&outbound, resetter.as_mut(), &env, &cancel)
        .await
        .expect_err("reset fails");
    assert!(matches!(err, AppError::Reset { .. }));
    assert!(!err.is_fatal());

    controller
        .reset(&outbound, resetter.as_mut(), &env, &cancel)
        .await
        .expect("second reset succeeds");

    let messages = collect(&mut rx);
    assert_eq!(
        statuses(&messages),
        vec![
            ResetStatus::Started,
            ResetStatus::Failed,
            ResetStatus::Started,
            ResetStatus::Ended,
        ]
    );
    let ClientMessage::ResetProgress(failed) = &messages[1] else {
        panic!("expected reset progress");
    };
    assert_eq!(failed.reason, vec!["connection refused", "script failed"]);
    assert!(controller.had_reset_error(), "a later success does not clear it");
}

/// Delivery failure of `started` aborts the reset before the resetter runs.
#[tokio::test]
async fn closed_outbound_is_fatal() {
    let (outbound, rx) = outbound_pair();
    drop(rx);
    let model = FakeModel::passing();
    let mut resetter = model.resetter().expect("resetter");
    let mut controller = ResetController::new();

    let err = controller
        .reset(&outbound, resetter.as_mut(), &EnvSnapshot::new(), &CancellationToken::new())
        .await
        .expect_err("nobody listening");

    assert!(matches!(err, AppError::Transport(_)));
    assert_eq!(model.resets.load(Ordering::SeqCst), 0);
}

// ── Failure reasons ──────────────────────────────────────────────────────────

#[test]
fn reason_without_tail_is_the_error_text() {
    let err = AppError::reset("reset", "timed out after 120s");
    assert_eq!(failure_reason(&err), vec![err.to_string()]);
}

#[test]
fn multi_line_errors_become_reason_lines() {
    let err = AppError::Config("first\nsecond".into());
    assert_eq!(failure_reason(&err), vec!["config: first", "second"]);
}
