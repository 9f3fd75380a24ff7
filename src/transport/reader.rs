//! Session reader task.
//!
//! Reads newline-delimited JSON from the orchestrator stream, parses each line
//! into a [`ServerMessage`], and forwards it through a tokio [`mpsc`] channel.
//! Closing the channel is how the reader reports end of stream.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::protocol::ServerMessage;
use crate::transport::codec::FrameCodec;
use crate::{AppError, Result};

/// Parse one line of the session stream.
///
/// Blank lines yield `Ok(None)`.
///
/// # Errors
///
/// Returns [`AppError::Directive`]`("malformed json: …")` when the line is not
/// a well-formed server message, including an unknown `kind`.
pub fn parse_inbound_line(line: &str) -> Result<Option<ServerMessage>> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    let msg: ServerMessage = serde_json::from_str(line)?;
    Ok(Some(msg))
}

/// Reader task: decodes server messages from `stream` into `inbound_tx`.
///
/// Malformed lines and framing errors are forwarded as `Err` items and end
/// the task: the session cannot resynchronize after a message it did not
/// understand.
///
/// # Cancellation
///
/// When `cancel` fires the task exits without forwarding anything.
pub async fn run_reader<R>(
    stream: R,
    inbound_tx: mpsc::Sender<Result<ServerMessage>>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stream, FrameCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("session reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                let forwarded = match item {
                    None => {
                        debug!("session reader: EOF detected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "session reader: framing error, stopping");
                        inbound_tx.send(Err(e)).await.ok();
                        break;
                    }
                    Some(Ok(line)) => match parse_inbound_line(&line) {
                        Ok(Some(msg)) => inbound_tx.send(Ok(msg)).await,
                        Ok(None) => Ok(()),
                        Err(e) => {
                            warn!(error = %e, raw_line = %line, "session reader: unparseable message, stopping");
                            inbound_tx.send(Err(e)).await.ok();
                            break;
                        }
                    },
                };

                if forwarded.is_err() {
                    debug!("session reader: inbound channel closed, stopping");
                    break;
                }
            }
        }
    }
}

/// Map a closed inbound channel to the error the driver reports.
pub(crate) fn stream_closed() -> AppError {
    AppError::Transport("stream closed by orchestrator".into())
}
