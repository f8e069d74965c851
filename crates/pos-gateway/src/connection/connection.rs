//! Individual client connection
//!
//! One connection owns one upgraded socket. Three tasks serve it:
//!
//! - the reader accumulates bytes, decodes frames one at a time and reacts to
//!   control frames;
//! - the writer owns the write half and drains the outbound queue in order;
//! - the keepalive task queues an unsolicited ping every interval.
//!
//! Every way a connection can end funnels into [`Connection::teardown`], which
//! runs at most once.

use crate::protocol::{frame, CloseCode, Envelope, Frame, FrameDecoder, OpCode};
use bytes::Bytes;
use parking_lot::Mutex;
use pos_common::GatewayConfig;
use serde_json::Value;
use std::fmt;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::AbortHandle;

/// How long a queued close frame may take to reach the socket
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Spare receive-buffer capacity ensured before each socket read
const READ_CHUNK: usize = 4096;

/// Process-unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Per-connection settings
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub keepalive_interval: Duration,
    pub max_frame_bytes: u64,
    pub outbound_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

impl From<&GatewayConfig> for ConnectionConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            keepalive_interval: config.keepalive_interval(),
            max_frame_bytes: config.max_frame_bytes,
            outbound_buffer: config.outbound_buffer,
        }
    }
}

/// Why a connection was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// Peer closed the TCP stream
    PeerClosed,
    /// Reading from the socket failed
    ReadFailed,
    /// Writing to the socket failed
    WriteFailed,
    /// Outbound queue was full
    Backpressure,
    /// Close initiated with this status
    Closed(CloseCode),
}

/// Errors from the send path
///
/// The connection has already been torn down when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection is closed")]
    Closed,

    #[error("outbound queue is full")]
    Backpressure,

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

enum Outbound {
    Frame(Bytes),
    /// Last frame; the writer shuts the socket down after it
    Close(Bytes),
}

#[derive(Default)]
struct Tasks {
    reader: Option<AbortHandle>,
    writer: Option<AbortHandle>,
    keepalive: Option<AbortHandle>,
}

type TeardownHook = Box<dyn FnOnce(ConnectionId) + Send>;

/// A single upgraded client connection
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    outbound: mpsc::Sender<Outbound>,
    closed: AtomicBool,
    tasks: Mutex<Tasks>,
    on_teardown: Mutex<Option<TeardownHook>>,
    created_at: Instant,
}

impl Connection {
    /// Start serving `stream`
    ///
    /// `on_teardown` runs exactly once, when the connection ends for whatever
    /// reason.
    pub fn spawn<S>(
        id: ConnectionId,
        peer: Option<SocketAddr>,
        stream: S,
        config: &ConnectionConfig,
        on_teardown: impl FnOnce(ConnectionId) + Send + 'static,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(config.outbound_buffer.max(1));
        let connection = Arc::new(Self {
            id,
            peer,
            outbound: tx,
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Tasks::default()),
            on_teardown: Mutex::new(Some(Box::new(on_teardown))),
            created_at: Instant::now(),
        });

        let (read_half, write_half) = tokio::io::split(stream);
        let decoder = FrameDecoder::new(config.max_frame_bytes);

        let writer = tokio::spawn(write_loop(Arc::downgrade(&connection), write_half, rx));
        let reader = tokio::spawn(read_loop(connection.clone(), read_half, decoder));
        let keepalive = tokio::spawn(keepalive_loop(
            Arc::downgrade(&connection),
            config.keepalive_interval,
        ));

        *connection.tasks.lock() = Tasks {
            reader: Some(reader.abort_handle()),
            writer: Some(writer.abort_handle()),
            keepalive: Some(keepalive.abort_handle()),
        };

        // A task may already have torn the connection down before its handles were stored
        if connection.is_closed() {
            connection.abort_tasks(false);
        }

        tracing::info!(connection_id = %id, peer = ?peer, "Connection established");

        connection
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Get connection age
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Send an application event as a JSON text frame
    pub fn send(&self, event: &str, payload: Value) -> Result<(), SendError> {
        self.send_envelope(&Envelope::new(event, payload))
    }

    /// Send an already built envelope
    pub fn send_envelope(&self, envelope: &Envelope) -> Result<(), SendError> {
        let json = envelope.to_json()?;
        self.send_encoded(frame::encode(OpCode::Text, json.as_bytes()))
    }

    /// Queue a fully encoded frame
    ///
    /// Lets a broadcast encode once and share the bytes across connections.
    pub(crate) fn send_encoded(&self, frame: Bytes) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }

        match self.outbound.try_send(Outbound::Frame(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %self.id, "Outbound queue full, dropping connection");
                self.teardown(TeardownReason::Backpressure);
                Err(SendError::Backpressure)
            }
            Err(TrySendError::Closed(_)) => {
                self.teardown(TeardownReason::WriteFailed);
                Err(SendError::Closed)
            }
        }
    }

    fn send_control(&self, opcode: OpCode, payload: &[u8]) -> Result<(), SendError> {
        self.send_encoded(frame::encode(opcode, payload))
    }

    /// Send a close frame with `code`, then tear down
    ///
    /// The close frame is best effort; teardown happens regardless.
    pub fn close(&self, code: CloseCode) {
        if self.is_closed() {
            return;
        }

        let queued = match self
            .outbound
            .try_send(Outbound::Close(frame::encode_close(code)))
        {
            Ok(()) => true,
            Err(e) => {
                let reason = match e {
                    TrySendError::Full(_) => "outbound queue full",
                    TrySendError::Closed(_) => "writer gone",
                };
                tracing::debug!(connection_id = %self.id, reason, "Could not queue close frame");
                false
            }
        };

        self.shutdown(TeardownReason::Closed(code), queued);
    }

    /// End the connection without a close frame
    pub(crate) fn teardown(&self, reason: TeardownReason) {
        self.shutdown(reason, false);
    }

    fn shutdown(&self, reason: TeardownReason, flush_close: bool) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.abort_tasks(flush_close);

        tracing::info!(
            connection_id = %self.id,
            reason = ?reason,
            age_ms = self.age().as_millis() as u64,
            "Connection closed"
        );

        let hook = self.on_teardown.lock().take();
        if let Some(hook) = hook {
            hook(self.id);
        }
    }

    fn abort_tasks(&self, flush_close: bool) {
        let tasks = std::mem::take(&mut *self.tasks.lock());

        for handle in [tasks.keepalive, tasks.reader].into_iter().flatten() {
            handle.abort();
        }

        let Some(writer) = tasks.writer else {
            return;
        };

        // The writer stops on its own after the close frame; bound how long that may take
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) if flush_close => {
                runtime.spawn(async move {
                    tokio::time::sleep(CLOSE_FLUSH_TIMEOUT).await;
                    writer.abort();
                });
            }
            _ => writer.abort(),
        }
    }

    fn handle_frame(&self, frame: Frame) -> ControlFlow<()> {
        if !frame.fin || frame.opcode == OpCode::Continuation {
            tracing::debug!(connection_id = %self.id, "Fragmented message rejected");
            self.close(CloseCode::ProtocolError);
            return ControlFlow::Break(());
        }

        match frame.opcode {
            OpCode::Close => {
                let code = CloseCode::from_payload(&frame.payload)
                    .and_then(CloseCode::from_u16)
                    .unwrap_or(CloseCode::Normal);
                tracing::debug!(connection_id = %self.id, code = %code, "Client closed connection");
                self.close(code);
                ControlFlow::Break(())
            }
            OpCode::Ping => {
                tracing::trace!(connection_id = %self.id, "Ping received");
                match self.send_control(OpCode::Pong, &frame.payload) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(_) => ControlFlow::Break(()),
                }
            }
            OpCode::Pong => {
                tracing::trace!(connection_id = %self.id, "Pong received");
                ControlFlow::Continue(())
            }
            other => {
                tracing::trace!(connection_id = %self.id, opcode = %other, "Ignoring client frame");
                ControlFlow::Continue(())
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .field("created_at", &self.created_at)
            .finish()
    }
}

async fn read_loop<R>(connection: Arc<Connection>, mut reader: R, mut decoder: FrameDecoder)
where
    R: AsyncRead + Unpin,
{
    loop {
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    if connection.handle_frame(frame).is_break() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(connection_id = %connection.id, error = %err, "Protocol error");
                    connection.close(err.close_code());
                    return;
                }
            }
        }

        let buffer = decoder.buffer_mut();
        buffer.reserve(READ_CHUNK);
        match reader.read_buf(buffer).await {
            Ok(0) => {
                connection.teardown(TeardownReason::PeerClosed);
                return;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(connection_id = %connection.id, error = %err, "Socket read failed");
                connection.teardown(TeardownReason::ReadFailed);
                return;
            }
        }
    }
}

async fn write_loop<W>(connection: Weak<Connection>, mut writer: W, mut rx: mpsc::Receiver<Outbound>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let (bytes, last) = match message {
            Outbound::Frame(bytes) => (bytes, false),
            Outbound::Close(bytes) => (bytes, true),
        };

        if let Err(err) = write_frame(&mut writer, &bytes).await {
            if let Some(connection) = connection.upgrade() {
                tracing::debug!(connection_id = %connection.id, error = %err, "Socket write failed");
                connection.teardown(TeardownReason::WriteFailed);
            }
            return;
        }

        if last {
            // Peer may already be gone
            let _ = writer.shutdown().await;
            return;
        }
    }
}

async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

async fn keepalive_loop(connection: Weak<Connection>, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        ticker.tick().await;

        let Some(connection) = connection.upgrade() else {
            return;
        };
        if connection.is_closed() {
            return;
        }

        // A failed ping has already torn the connection down
        if connection.send_control(OpCode::Ping, &[]).is_err() {
            return;
        }
        tracing::trace!(connection_id = %connection.id, "Keepalive ping queued");
    }
}
