//! Lifecycle and I/O orchestration for one client.
//!
//! A connection reads whatever the socket offers, completes the version
//! handshake, feeds the rest through the [`Framer`], hands each frame to its
//! [`Gateway`], and writes the responses back in order. Protocol violations,
//! I/O errors, an expired liveness window, or server shutdown abort it.
//!
//! Reading pauses while responses are waiting to be written, so a client that
//! stops reading cannot grow the backlog. The liveness deadline and shutdown
//! are watched during writes as well as reads.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use super::{CONNECTION_TARGET, ConnectionError};
use crate::error_context::ErrorContext;
use crate::gateway::Gateway;
use crate::protocol::{Framer, Handshake};

const READ_CHUNK_BYTES: usize = 4096;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake and request processing are active.
    Open,
    /// An abort was requested; the socket is being shut down.
    Closing,
    /// All resources are released.
    Closed,
}

/// Per-connection limits taken from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Silence tolerated before the connection is aborted.
    pub heartbeat_timeout: Duration,
    /// Largest request payload accepted.
    pub max_frame_bytes: u32,
}

enum Event {
    Read(io::Result<usize>),
    Written(io::Result<()>),
    Idle,
    Shutdown,
}

/// One client connection over any async byte stream.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    state: ConnectionState,
    handshake: Handshake,
    protocol: Option<u64>,
    framer: Framer,
    gateway: Option<Gateway>,
    settings: ConnectionSettings,
    last_activity: Instant,
    read_buffer: Vec<u8>,
    pending: Vec<u8>,
    error: ErrorContext,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an accepted stream.
    pub fn new(stream: S, gateway: Gateway, settings: ConnectionSettings) -> Self {
        Self {
            stream,
            state: ConnectionState::Open,
            handshake: Handshake::new(),
            protocol: None,
            framer: Framer::new(settings.max_frame_bytes),
            gateway: Some(gateway),
            settings,
            last_activity: Instant::now(),
            read_buffer: vec![0; READ_CHUNK_BYTES],
            pending: Vec::new(),
            error: ErrorContext::new(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Negotiated protocol version, once the handshake completed.
    #[must_use]
    pub fn protocol(&self) -> Option<u64> {
        self.protocol
    }

    /// Why the connection was aborted, if it was.
    #[must_use]
    pub fn error(&self) -> &ErrorContext {
        &self.error
    }

    /// Serves the client until the connection closes.
    ///
    /// The socket operation in flight (a read, or the write of pending
    /// responses), the liveness deadline, and `shutdown` are multiplexed;
    /// whichever fires first is handled before waiting again.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        if *shutdown.borrow_and_update() {
            self.abort(&ConnectionError::Shutdown);
        }
        while self.state == ConnectionState::Open {
            let deadline = self.last_activity + self.settings.heartbeat_timeout;
            let event = if self.pending.is_empty() {
                tokio::select! {
                    read = self.stream.read(&mut self.read_buffer) => Event::Read(read),
                    () = sleep_until(deadline) => Event::Idle,
                    _ = shutdown.changed() => Event::Shutdown,
                }
            } else {
                tokio::select! {
                    written = write_pending(&mut self.stream, &mut self.pending) => {
                        Event::Written(written)
                    }
                    () = sleep_until(deadline) => Event::Idle,
                    _ = shutdown.changed() => Event::Shutdown,
                }
            };
            match event {
                Event::Read(Ok(0)) => self.abort(&ConnectionError::EndOfFile),
                Event::Read(Ok(read)) => self.on_read(read),
                Event::Read(Err(error)) => self.abort(&ConnectionError::Read(error)),
                Event::Written(Ok(())) => {}
                Event::Written(Err(error)) => self.abort(&ConnectionError::Write(error)),
                Event::Idle => {
                    let elapsed_ms = self.last_activity.elapsed().as_millis();
                    self.abort(&ConnectionError::HeartbeatTimeout { elapsed_ms });
                }
                Event::Shutdown => self.abort(&ConnectionError::Shutdown),
            }
        }
        self.close().await;
    }

    /// Stops processing and releases the gateway and its database.
    ///
    /// Pending responses are discarded. Calling it again has no effect.
    pub fn abort(&mut self, reason: &ConnectionError) {
        if self.state != ConnectionState::Open {
            return;
        }
        match reason {
            ConnectionError::EndOfFile | ConnectionError::Shutdown => {
                debug!(target: CONNECTION_TARGET, reason = %reason, "connection closing");
            }
            _ => warn!(target: CONNECTION_TARGET, reason = %reason, "connection aborted"),
        }
        self.error.record(reason);
        self.state = ConnectionState::Closing;
        self.pending.clear();
        self.gateway = None;
    }

    fn on_read(&mut self, read: usize) {
        let buffer = std::mem::take(&mut self.read_buffer);
        let consumed = buffer.get(..read).map(|bytes| self.consume(bytes));
        self.read_buffer = buffer;
        if let Some(Err(error)) = consumed {
            self.abort(&error);
        }
    }

    fn consume(&mut self, mut bytes: &[u8]) -> Result<(), ConnectionError> {
        if self.protocol.is_none() {
            let (version, rest) = self.handshake.feed(bytes)?;
            let Some(version) = version else {
                return Ok(());
            };
            debug!(target: CONNECTION_TARGET, protocol = version, "handshake completed");
            self.protocol = Some(version);
            self.last_activity = Instant::now();
            bytes = rest;
        }

        let Some(gateway) = self.gateway.as_mut() else {
            return Ok(());
        };
        let pending = &mut self.pending;
        let mut encode_error = None;
        let emitted = self.framer.feed(bytes, |frame| {
            if encode_error.is_some() {
                return;
            }
            match gateway.handle(frame).encode() {
                Ok(encoded) => pending.extend_from_slice(&encoded),
                Err(error) => encode_error = Some(error),
            }
        });
        let emitted = emitted.map_err(ConnectionError::from)?;
        if let Some(error) = encode_error {
            return Err(ConnectionError::Encode(error));
        }
        if emitted > 0 {
            self.last_activity = Instant::now();
        }
        Ok(())
    }

    async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closing;
        self.gateway = None;
        if let Err(error) = self.stream.shutdown().await {
            debug!(target: CONNECTION_TARGET, error = %error, "socket shutdown failed");
        }
        self.state = ConnectionState::Closed;
    }
}

/// Writes and flushes every pending response byte, then clears the backlog.
///
/// Dropping the future part way leaves `pending` untouched; the connection is
/// aborted in that case, so the partial write is never resumed.
async fn write_pending<S>(stream: &mut S, pending: &mut Vec<u8>) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(pending).await?;
    stream.flush().await?;
    pending.clear();
    Ok(())
}
