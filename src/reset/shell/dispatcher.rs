//! Long-lived bash dispatcher process.
//!
//! Spawns `bash` on the materialized dispatcher script and demultiplexes its
//! output:
//! - exit-code markers on stdout are forwarded to the phase waiting on them;
//! - trace lines are logged at debug level only;
//! - marker-like lines that are not part of the protocol are logged as
//!   warnings;
//! - everything else is genuine script output, forwarded to the progress
//!   sink and kept in a bounded tail for failure reports.
//!
//! The child is spawned with `kill_on_drop(true)`, so dropping a
//! [`Dispatcher`] never leaks the shell.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::reset::shell::policy::Phase;
use crate::reset::shell::script::{ControlLine, ControlMarkers, ScriptSet};
use crate::sink::ProgressSink;
use crate::{AppError, Result};

/// Lines of script output kept for failure reports.
pub const TAIL_LINES: usize = 20;

/// How long the dispatcher gets to exit after the exit marker.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// How long the dispatcher gets to exit after `SIGTERM`.
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Window for an exit code still in flight when the shell exits.
const LATE_EXIT_CODE: Duration = Duration::from_millis(200);

// ── Output tail ──────────────────────────────────────────────────────────────

/// Bounded buffer of the most recent script output lines.
#[derive(Debug, Default)]
pub struct OutputTail {
    lines: VecDeque<String>,
}

impl OutputTail {
    /// Append a line, evicting the oldest one beyond [`TAIL_LINES`].
    pub fn push(&mut self, line: String) {
        if self.lines.len() == TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Forget every line.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Copy of the buffered lines, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

type SharedTail = Arc<Mutex<OutputTail>>;

fn tail_snapshot(tail: &SharedTail) -> Vec<String> {
    tail.lock().map(|t| t.snapshot()).unwrap_or_default()
}

// ── Demultiplexer ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Source {
    Stdout,
    Stderr,
}

async fn demux<R>(
    stream: R,
    source: Source,
    markers: ControlMarkers,
    tail: SharedTail,
    exit_tx: Option<mpsc::Sender<i32>>,
    sink: Arc<dyn ProgressSink>,
) where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(stream).split(b'\n');
    loop {
        let segment = match segments.next_segment().await {
            Ok(Some(segment)) => segment,
            Ok(None) => break,
            Err(err) => {
                warn!(?source, %err, "error reading dispatcher output");
                break;
            }
        };
        let text = String::from_utf8_lossy(&segment);
        let line = text.trim_end_matches('\r');

        match markers.classify(line) {
            ControlLine::ExitCode(code) => match (&exit_tx, source) {
                (Some(tx), Source::Stdout) => {
                    if tx.send(code).await.is_err() {
                        debug!(code, "exit code arrived with nobody waiting");
                    }
                }
                _ => warn!(?source, line, "exit code marker on unexpected stream"),
            },
            ControlLine::Trace(trace) => debug!(?source, "{trace}"),
            ControlLine::Unexpected(other) => {
                warn!(?source, line = %other, "unexpected control line from dispatcher");
            }
            ControlLine::Output(output) => {
                match source {
                    Source::Stdout => sink.printf(&output),
                    Source::Stderr => sink.errorf(&output),
                }
                if let Ok(mut guard) = tail.lock() {
                    guard.push(output);
                }
            }
        }
    }
    debug!(?source, "dispatcher output closed");
}

// ── Dispatcher ───────────────────────────────────────────────────────────────

/// A running dispatcher shell.
#[derive(Debug)]
pub struct Dispatcher {
    child: Child,
    stdin: Option<ChildStdin>,
    exit_codes: mpsc::Receiver<i32>,
    markers: ControlMarkers,
    tail: SharedTail,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    alive: bool,
}

impl Dispatcher {
    /// Spawn `bash` on the dispatcher script of `scripts`.
    ///
    /// The shell inherits this process's environment; the campaign snapshot
    /// is re-declared inside each phase script.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Reset` when the process cannot be spawned or its
    /// pipes cannot be captured.
    pub fn spawn(
        scripts: &ScriptSet,
        markers: ControlMarkers,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        let mut child = Command::new("bash")
            .arg("--noprofile")
            .arg("--norc")
            .arg(scripts.dispatcher())
            .current_dir(scripts.dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| AppError::reset("dispatcher", format!("failed to spawn bash: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::reset("dispatcher", "failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::reset("dispatcher", "failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::reset("dispatcher", "failed to capture stderr"))?;

        let tail = SharedTail::default();
        let (exit_tx, exit_codes) = mpsc::channel(4);

        let stdout_task = tokio::spawn(demux(
            stdout,
            Source::Stdout,
            markers.clone(),
            Arc::clone(&tail),
            Some(exit_tx),
            Arc::clone(&sink),
        ));
        let stderr_task = tokio::spawn(demux(
            stderr,
            Source::Stderr,
            markers.clone(),
            Arc::clone(&tail),
            None,
            sink,
        ));

        info!(pid = child.id(), "lifecycle dispatcher spawned");
        Ok(Self {
            child,
            stdin: Some(stdin),
            exit_codes,
            markers,
            tail,
            stdout_task,
            stderr_task,
            alive: true,
        })
    }

    /// Whether the shell can still accept phases. A shell that exited on its
    /// own since the last phase is reaped here and reported dead.
    pub fn is_alive(&mut self) -> bool {
        if self.alive && !matches!(self.child.try_wait(), Ok(None)) {
            debug!("dispatcher exited between phases");
            self.alive = false;
            self.stdin = None;
        }
        self.alive
    }

    /// Output tail of the current phase.
    #[must_use]
    pub fn tail(&self) -> Vec<String> {
        tail_snapshot(&self.tail)
    }

    /// Run one phase script and wait for its exit code.
    ///
    /// A non-zero exit code leaves the dispatcher usable. A timeout, a
    /// cancellation, or a crash of the shell kills it; a new dispatcher must
    /// be spawned before the next phase.
    ///
    /// # Errors
    ///
    /// - `AppError::Reset` for a non-zero exit, a timeout, or a crash. The
    ///   error carries the output tail.
    /// - `AppError::Cancelled` when `cancel` fires first.
    pub async fn run_phase(
        &mut self,
        phase: Phase,
        script: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !self.is_alive() {
            return Err(AppError::reset(phase.as_str(), "dispatcher is not running"));
        }
        if let Ok(mut guard) = self.tail.lock() {
            guard.clear();
        }
        while self.exit_codes.try_recv().is_ok() {}

        let line = self.markers.exec_line(script);
        if let Err(err) = self.write_control(&line).await {
            self.alive = false;
            return Err(self.phase_error(phase, None, format!("cannot reach dispatcher: {err}")));
        }
        debug!(%phase, script = %script.display(), "phase started");

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let code = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.kill().await;
                return Err(AppError::Cancelled(format!("{phase} phase cancelled")));
            }
            code = self.exit_codes.recv() => code,
            status = self.child.wait() => {
                debug!(?status, "dispatcher exited during phase");
                self.alive = false;
                self.stdin = None;
                tokio::time::timeout(LATE_EXIT_CODE, self.exit_codes.recv())
                    .await
                    .ok()
                    .flatten()
            }
            () = &mut deadline => {
                self.kill().await;
                return Err(self.phase_error(
                    phase,
                    None,
                    format!("timed out after {}s", timeout.as_secs()),
                ));
            }
        };

        match code {
            Some(0) => {
                debug!(%phase, "phase succeeded");
                Ok(())
            }
            Some(code) => Err(self.phase_error(phase, Some(code), "script failed".into())),
            None => {
                self.kill().await;
                Err(self.phase_error(phase, None, "dispatcher exited unexpectedly".into()))
            }
        }
    }

    /// Ask the shell to exit, escalating to `SIGTERM` and then `SIGKILL`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Reset` when the shell cannot be reaped.
    pub async fn shutdown(mut self) -> Result<()> {
        if self.alive {
            let line = self.markers.exit_line();
            if let Err(err) = self.write_control(&line).await {
                debug!(%err, "dispatcher stdin already closed");
            }
        }
        self.stdin = None;

        let reaped = match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(status) => status.map(|_| ()),
            Err(_) => {
                warn!("dispatcher ignored exit request, sending SIGTERM");
                self.terminate_signal();
                match tokio::time::timeout(TERM_GRACE, self.child.wait()).await {
                    Ok(status) => status.map(|_| ()),
                    Err(_) => {
                        warn!("dispatcher ignored SIGTERM, killing");
                        self.child.kill().await
                    }
                }
            }
        };
        self.alive = false;

        self.stdout_task.abort();
        self.stderr_task.abort();
        info!("lifecycle dispatcher stopped");
        reaped.map_err(|err| AppError::reset("dispatcher", format!("cannot reap bash: {err}")))
    }

    async fn write_control(&mut self, line: &str) -> std::io::Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin closed")
        })?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }

    async fn kill(&mut self) {
        self.alive = false;
        self.stdin = None;
        if let Err(err) = self.child.kill().await {
            debug!(%err, "dispatcher already gone");
        }
    }

    #[cfg(unix)]
    fn terminate_signal(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id().and_then(|id| i32::try_from(id).ok()) else {
            return;
        };
        if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            debug!(%err, pid, "SIGTERM delivery failed");
        }
    }

    #[cfg(not(unix))]
    fn terminate_signal(&self) {}

    fn phase_error(&self, phase: Phase, exit_code: Option<i32>, message: String) -> AppError {
        AppError::Reset {
            phase: phase.as_str().to_owned(),
            exit_code,
            message,
            output_tail: self.tail(),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stdout_task.abort();
        self.stderr_task.abort();
    }
}
