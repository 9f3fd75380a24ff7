//! Session stream with the orchestrator.
//!
//! The underlying stream tolerates exactly one concurrent reader and one
//! concurrent writer, so each direction gets its own task:
//! - `codec`: line framing with a maximum line length.
//! - `reader`: decodes [`ServerMessage`]s into an inbound channel.
//! - `writer`: encodes [`ClientMessage`]s from an outbound channel.
//!
//! Send and receive paths share no lock and proceed independently.

pub mod codec;
pub mod reader;
pub mod writer;

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::protocol::{ClientMessage, ServerMessage};
use crate::{AppError, Result};

/// Capacity of each direction's channel.
const CHANNEL_CAPACITY: usize = 64;

/// How long `close` waits for queued outbound messages to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Cloneable handle onto the outbound half of a [`Transport`].
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<ClientMessage>,
}

impl Outbound {
    /// Wrap a raw channel sender.
    #[must_use]
    pub fn new(tx: mpsc::Sender<ClientMessage>) -> Self {
        Self { tx }
    }

    /// Queue `msg` for the writer task.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] when the writer task has stopped.
    pub async fn send(&self, msg: ClientMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| AppError::Transport("writer task stopped".into()))
    }
}

/// Bidirectional typed message stream.
#[derive(Debug)]
pub struct Transport {
    outbound: Outbound,
    inbound: mpsc::Receiver<Result<ServerMessage>>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<Result<()>>,
}

impl Transport {
    /// Split `stream` and spawn its reader and writer tasks.
    ///
    /// The tasks observe a child of `cancel`: cancelling the session tears
    /// them down, while [`Transport::close`] only stops this transport.
    pub fn new<S>(stream: S, cancel: &CancellationToken) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let cancel = cancel.child_token();
        let (read_half, write_half) = tokio::io::split(stream);
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let reader = tokio::spawn(reader::run_reader(read_half, in_tx, cancel.clone()));
        let writer = tokio::spawn(writer::run_writer(write_half, out_rx, cancel.clone()));

        Self {
            outbound: Outbound::new(out_tx),
            inbound: in_rx,
            cancel,
            reader,
            writer,
        }
    }

    /// Connect to the orchestrator over TCP.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the connection cannot be opened.
    pub async fn connect_tcp(address: &str, cancel: &CancellationToken) -> Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| AppError::Transport(format!("cannot connect to {address}: {e}")))?;
        stream.set_nodelay(true).ok();
        info!(address, "connected to orchestrator");
        Ok(Self::new(stream, cancel))
    }

    /// Handle for sending from other components.
    #[must_use]
    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// Queue one message for sending.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] when the writer task has stopped.
    pub async fn send(&self, msg: ClientMessage) -> Result<()> {
        self.outbound.send(msg).await
    }

    /// Wait for the next server message.
    ///
    /// # Errors
    ///
    /// - [`AppError::Transport`] when the stream closed or the transport was
    ///   cancelled.
    /// - [`AppError::Directive`] when the orchestrator sent something that
    ///   could not be parsed.
    pub async fn receive(&mut self) -> Result<ServerMessage> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                Err(AppError::Cancelled("transport cancelled while receiving".into()))
            }
            item = self.inbound.recv() => item.unwrap_or_else(|| Err(reader::stream_closed())),
        }
    }

    /// Wait for the next server message, at most `ceiling`.
    ///
    /// # Errors
    ///
    /// Same as [`Transport::receive`], plus [`AppError::Transport`] when the
    /// ceiling elapses first.
    pub async fn receive_within(&mut self, ceiling: Duration) -> Result<ServerMessage> {
        tokio::time::timeout(ceiling, self.receive())
            .await
            .map_err(|_| {
                AppError::Transport(format!("no reply from orchestrator within {ceiling:?}"))
            })?
    }

    /// Drain pending outbound messages, then stop both tasks.
    ///
    /// # Errors
    ///
    /// Returns the writer task's error, if it failed.
    pub async fn close(self) -> Result<()> {
        let Self {
            outbound,
            inbound,
            cancel,
            reader,
            writer,
        } = self;

        drop(outbound);
        let written = match tokio::time::timeout(DRAIN_TIMEOUT, writer).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(AppError::Transport(format!(
                "writer task panicked: {join_err}"
            ))),
            Err(_) => {
                warn!("session writer did not drain in time");
                Ok(())
            }
        };

        cancel.cancel();
        drop(inbound);
        if let Err(join_err) = reader.await {
            warn!(%join_err, "session reader task ended abnormally");
        }
        debug!("transport closed");
        written
    }
}
