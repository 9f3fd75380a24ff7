//! Session writer task.
//!
//! Receives outbound [`ClientMessage`]s from a tokio [`mpsc`] channel,
//! serialises each to a single JSON line and writes it to the stream.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::protocol::ClientMessage;
use crate::{AppError, Result};

/// Serialise one outbound message as a `\n`-terminated JSON line.
///
/// # Errors
///
/// Returns [`AppError::Transport`] if serialisation fails.
pub fn encode_outbound(msg: &ClientMessage) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(msg)
        .map_err(|e| AppError::Transport(format!("failed to serialise outbound message: {e}")))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Writer task: drains `msg_rx` into `stream`.
///
/// Exits when `cancel` fires or when every sender is dropped. Messages already
/// queued when the last sender drops are still written.
///
/// # Errors
///
/// - [`AppError::Transport`]`("failed to serialise outbound message: …")`.
/// - [`AppError::Transport`]`("write failed: …")` when the stream is gone.
pub async fn run_writer<W>(
    stream: W,
    mut msg_rx: mpsc::Receiver<ClientMessage>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut stream = stream;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("session writer: cancellation received, stopping");
                break;
            }

            msg = msg_rx.recv() => {
                let Some(msg) = msg else {
                    debug!("session writer: message channel closed, stopping");
                    break;
                };

                let bytes = encode_outbound(&msg)?;
                stream.write_all(&bytes).await.map_err(|e| {
                    warn!(error = %e, "session writer: write failed");
                    AppError::Transport(format!("write failed: {e}"))
                })?;
                stream
                    .flush()
                    .await
                    .map_err(|e| AppError::Transport(format!("flush failed: {e}")))?;
            }
        }
    }

    stream.shutdown().await.ok();
    Ok(())
}
