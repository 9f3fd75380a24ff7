//! Integration tests for the persistent-shell resetter.
//!
//! These run real `bash` processes. Each test writes to its own temp
//! directory, passed to the scripts through the environment snapshot.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use campaign_client::models::campaign::{EnvSnapshot, ResetterDescriptor};
use campaign_client::reset::shell::policy::ShellScripts;
use campaign_client::reset::shell::ShellSingleton;
use campaign_client::reset::Resetter;
use campaign_client::sink::ProgressSink;
use campaign_client::AppError;

use super::test_helpers::RecordingSink;

const PHASE_TIMEOUT: Duration = Duration::from_secs(10);

fn scripts(start: &str, reset: &str, stop: &str) -> ShellScripts {
    ShellScripts {
        start: start.into(),
        reset: reset.into(),
        stop: stop.into(),
    }
}

fn shell(scripts: ShellScripts, timeout: Duration) -> (ShellSingleton, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let resetter =
        ShellSingleton::new(scripts, Arc::clone(&sink) as Arc<dyn ProgressSink>, timeout);
    (resetter, sink)
}

fn env_with_dir(dir: &Path) -> EnvSnapshot {
    let mut env = EnvSnapshot::new();
    env.insert("WORK_DIR".into(), dir.display().to_string());
    env
}

fn log_lines(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_owned)
        .collect()
}

// ── Phase execution ──────────────────────────────────────────────────────────

/// Script output reaches the sink; trace lines do not.
#[tokio::test]
async fn reset_output_is_forwarded() {
    let (mut resetter, sink) = shell(scripts("", "echo resetting database", ""), PHASE_TIMEOUT);
    let cancel = CancellationToken::new();

    resetter
        .exec_reset(&EnvSnapshot::new(), &cancel)
        .await
        .expect("reset succeeds");
    resetter.terminate(&cancel).await.expect("terminate");

    let printed = sink.printed();
    assert!(printed.iter().any(|l| l == "resetting database"));
    assert!(!printed.iter().any(|l| l.contains("~trace~")));
}

/// A non-zero exit code fails the reset with the code and output tail.
#[tokio::test]
async fn failing_script_reports_exit_code_and_tail() {
    let (mut resetter, _sink) = shell(
        scripts("", "echo db unreachable\nexit 3", ""),
        PHASE_TIMEOUT,
    );
    let cancel = CancellationToken::new();

    let err = resetter
        .exec_reset(&EnvSnapshot::new(), &cancel)
        .await
        .expect_err("script fails");
    let AppError::Reset {
        phase,
        exit_code,
        output_tail,
        ..
    } = err
    else {
        panic!("expected reset error, got {err:?}");
    };
    assert_eq!(phase, "reset");
    assert_eq!(exit_code, Some(3));
    assert_eq!(output_tail, vec!["db unreachable"]);

    resetter.terminate(&cancel).await.expect("terminate");
}

/// Failed commands stop the script.
#[tokio::test]
async fn scripts_run_in_strict_mode() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut resetter, _sink) = shell(
        scripts("", "false\necho unreachable >> \"$WORK_DIR/log\"", ""),
        PHASE_TIMEOUT,
    );
    let cancel = CancellationToken::new();

    let err = resetter
        .exec_reset(&env_with_dir(dir.path()), &cancel)
        .await
        .expect_err("false aborts the script");
    assert!(matches!(err, AppError::Reset { exit_code: Some(1), .. }));
    assert!(log_lines(dir.path()).is_empty());

    resetter.terminate(&cancel).await.expect("terminate");
}

/// Variables exported by one phase are visible to the next.
#[tokio::test]
async fn exports_persist_across_phases() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut resetter, _sink) = shell(
        scripts(
            "export SUT_PORT=8181",
            "echo \"reset $SUT_PORT\" >> \"$WORK_DIR/log\"",
            "echo \"stop $SUT_PORT\" >> \"$WORK_DIR/log\"",
        ),
        PHASE_TIMEOUT,
    );
    let env = env_with_dir(dir.path());
    let cancel = CancellationToken::new();

    resetter.exec_reset(&env, &cancel).await.expect("first reset");
    resetter.exec_reset(&env, &cancel).await.expect("second reset");
    resetter.terminate(&cancel).await.expect("terminate");

    assert_eq!(
        log_lines(dir.path()),
        vec!["reset 8181", "reset 8181", "stop 8181"]
    );
}

/// Snapshot variables are read-only inside scripts.
#[tokio::test]
async fn snapshot_variables_are_read_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut resetter, _sink) = shell(scripts("", "WORK_DIR=/elsewhere", ""), PHASE_TIMEOUT);
    let cancel = CancellationToken::new();

    let err = resetter
        .exec_reset(&env_with_dir(dir.path()), &cancel)
        .await
        .expect_err("assignment to read-only variable");
    assert!(matches!(err, AppError::Reset { .. }));

    resetter.terminate(&cancel).await.expect("terminate");
}

// ── Reset policy ─────────────────────────────────────────────────────────────

/// With only start and stop, a reset restarts the SUT.
#[tokio::test]
async fn start_stop_policy_restarts_on_reset() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut resetter, _sink) = shell(
        scripts(
            "echo start >> \"$WORK_DIR/log\"",
            "",
            "echo stop >> \"$WORK_DIR/log\"",
        ),
        PHASE_TIMEOUT,
    );
    let env = env_with_dir(dir.path());
    let cancel = CancellationToken::new();

    assert!(resetter.is_first_reset());
    resetter.exec_reset(&env, &cancel).await.expect("first reset");
    assert!(resetter.is_started());
    assert!(!resetter.is_first_reset());
    resetter.exec_reset(&env, &cancel).await.expect("second reset");
    resetter.terminate(&cancel).await.expect("terminate");

    assert_eq!(
        log_lines(dir.path()),
        vec!["start", "stop", "start", "stop"]
    );
    assert!(!resetter.is_started());
}

/// A reset that fails after a successful start does not start the SUT again.
#[tokio::test]
async fn failed_first_reset_does_not_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("broken"), "").expect("marker");
    let (mut resetter, _sink) = shell(
        scripts(
            "echo start >> \"$WORK_DIR/log\"",
            "echo reset >> \"$WORK_DIR/log\"\nif [ -f \"$WORK_DIR/broken\" ]; then rm \"$WORK_DIR/broken\"; exit 4; fi",
            "echo stop >> \"$WORK_DIR/log\"",
        ),
        PHASE_TIMEOUT,
    );
    let env = env_with_dir(dir.path());
    let cancel = CancellationToken::new();

    let err = resetter
        .exec_reset(&env, &cancel)
        .await
        .expect_err("reset phase fails");
    assert!(matches!(err, AppError::Reset { exit_code: Some(4), .. }));
    assert!(resetter.is_started());
    assert!(!resetter.is_first_reset());

    resetter.exec_reset(&env, &cancel).await.expect("second reset");
    resetter.terminate(&cancel).await.expect("terminate");

    assert_eq!(
        log_lines(dir.path()),
        vec!["start", "reset", "reset", "stop"]
    );
}

/// Terminate does not run stop when the SUT was never started.
#[tokio::test]
async fn terminate_without_start_skips_stop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut resetter, _sink) = shell(
        scripts("true", "true", "echo stop >> \"$WORK_DIR/log\""),
        PHASE_TIMEOUT,
    );
    let cancel = CancellationToken::new();

    resetter.terminate(&cancel).await.expect("terminate");
    resetter.terminate(&cancel).await.expect("terminate is idempotent");
    assert!(log_lines(dir.path()).is_empty());
}

#[tokio::test]
async fn undefined_phase_is_a_config_error() {
    let (mut resetter, _sink) = shell(scripts("", "true", ""), PHASE_TIMEOUT);
    let cancel = CancellationToken::new();

    let err = resetter
        .exec_start(&EnvSnapshot::new(), &cancel)
        .await
        .expect_err("no start script");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn descriptor_lists_the_scripts() {
    let (resetter, _sink) = shell(scripts("./up", "", "./down"), PHASE_TIMEOUT);
    assert_eq!(
        resetter.descriptor(),
        ResetterDescriptor::Shell {
            start: "./up".into(),
            reset: String::new(),
            stop: "./down".into(),
        }
    );
}

// ── Failure recovery ─────────────────────────────────────────────────────────

/// A phase that overruns its timeout kills the shell; the next phase gets a
/// fresh one.
#[tokio::test]
async fn timed_out_phase_is_killed_and_shell_respawned() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("slow"), "").expect("marker");
    let (mut resetter, _sink) = shell(
        scripts(
            "",
            "if [ -f \"$WORK_DIR/slow\" ]; then rm \"$WORK_DIR/slow\"; sleep 5; fi\necho ok >> \"$WORK_DIR/log\"",
            "",
        ),
        Duration::from_millis(500),
    );
    let env = env_with_dir(dir.path());
    let cancel = CancellationToken::new();

    let err = resetter
        .exec_reset(&env, &cancel)
        .await
        .expect_err("phase overruns");
    let AppError::Reset { message, .. } = &err else {
        panic!("expected reset error, got {err:?}");
    };
    assert!(message.contains("timed out"));

    resetter.exec_reset(&env, &cancel).await.expect("fresh shell");
    resetter.terminate(&cancel).await.expect("terminate");
    assert_eq!(log_lines(dir.path()), vec!["ok"]);
}

/// A shell that dies after reporting success is replaced on the next phase.
#[tokio::test]
async fn shell_lost_between_phases_is_respawned() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("doomed"), "").expect("marker");
    let (mut resetter, _sink) = shell(
        scripts(
            "",
            "echo reset >> \"$WORK_DIR/log\"\nif [ -f \"$WORK_DIR/doomed\" ]; then rm \"$WORK_DIR/doomed\"; (sleep 0.2; kill -9 $$) >/dev/null 2>&1 & fi",
            "",
        ),
        PHASE_TIMEOUT,
    );
    let env = env_with_dir(dir.path());
    let cancel = CancellationToken::new();

    resetter.exec_reset(&env, &cancel).await.expect("first reset");
    tokio::time::sleep(Duration::from_secs(1)).await;
    resetter
        .exec_reset(&env, &cancel)
        .await
        .expect("fresh shell runs the second reset");
    resetter.terminate(&cancel).await.expect("terminate");

    assert_eq!(log_lines(dir.path()), vec!["reset", "reset"]);
}

#[tokio::test]
async fn cancelled_phase_is_reported_as_cancelled() {
    let (mut resetter, _sink) = shell(scripts("", "sleep 5", ""), PHASE_TIMEOUT);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let err = resetter
        .exec_reset(&EnvSnapshot::new(), &cancel)
        .await
        .expect_err("cancelled");
    assert!(matches!(err, AppError::Cancelled(_)));

    resetter
        .terminate(&CancellationToken::new())
        .await
        .expect("terminate after cancel");
}
