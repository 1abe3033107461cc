//! Per-connection session handler.
//!
//! Each accepted connection gets its own `SessionHandler` that walks the
//! connection through its lifecycle:
//!
//! ```text
//! CONNECTING ─▶ REGISTERING ─▶ ACTIVE ─▶ CLOSING ─▶ CLOSED
//!                    │                      ▲
//!                    └──── rejected ────────┘
//! ```
//!
//! - REGISTERING: the first line is the desired username.
//! - ACTIVE: every further line goes to the `Router`.
//! - CLOSING: unregister (idempotent), then release the socket halves.
//!
//! The loop leaves ACTIVE on end-of-stream, on a read error, or when the
//! session's `closing` token fires (a failed delivery observed anywhere, or
//! server shutdown).
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_core::{SessionId, Username};
use relay_protocol::ServerNotice;

use crate::config::RelayConfig;
use crate::registry::{LeaveReason, RegistryError, RegistryHandle};
use crate::router::Router;
use crate::session::{spawn_writer, Outbox, Session, FLUSH_GRACE};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Connecting,
    Registering,
    Active,
    Closing,
    Closed,
}

/// Connection handler for a single client.
pub struct SessionHandler<R> {
    /// Buffered reader for incoming lines
    reader: BufReader<R>,

    /// Outgoing queue for this connection
    outbox: Outbox,

    /// Task that owns the write half
    writer_task: JoinHandle<()>,

    /// Handle to the session registry
    registry: RegistryHandle,

    /// Line router shared by all connections
    router: Router,

    /// Identifier assigned by the server
    session_id: SessionId,

    /// Longest accepted line in bytes
    max_line_length: usize,

    /// Server-wide shutdown signal
    shutdown: CancellationToken,

    /// Current lifecycle state
    state: HandlerState,
}

impl<R> SessionHandler<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Creates a new handler and starts the connection's writer task.
    ///
    /// # Arguments
    ///
    /// * `reader` - Read half of the connection
    /// * `writer` - Write half of the connection
    /// * `registry` - Handle to the session registry
    /// * `session_id` - Unique id for this connection
    /// * `config` - Line length and queue limits
    /// * `shutdown` - Server shutdown token; the session's own token is a child of it
    pub fn new<W>(
        reader: R,
        writer: W,
        registry: RegistryHandle,
        session_id: SessionId,
        config: &RelayConfig,
        shutdown: &CancellationToken,
    ) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbox, writer_task) = spawn_writer(
            writer,
            session_id,
            config.outbound_buffer,
            shutdown.child_token(),
        );

        Self {
            reader: BufReader::new(reader),
            outbox,
            writer_task,
            router: Router::new(registry.clone()),
            registry,
            session_id,
            max_line_length: config.max_line_length,
            shutdown: shutdown.clone(),
            state: HandlerState::Connecting,
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> HandlerState {
        self.state
    }

    /// Runs the connection to completion.
    ///
    /// Returns the username the connection was registered under, or `None`
    /// if registration never succeeded.
    pub async fn run(mut self) -> Option<Username> {
        debug!(session_id = %self.session_id, "New client connected");

        let session = match self.register().await {
            Ok(session) => session,
            Err(e) => {
                info!(session_id = %self.session_id, reason = %e, "Registration failed");
                self.close(None).await;
                return None;
            }
        };

        let reason = self.process_lines(&session).await;

        let username = session.username().clone();
        self.close(Some((session, reason))).await;
        Some(username)
    }

    /// REGISTERING: reads the desired username and asks the registry to
    /// admit it. Moves to ACTIVE on success.
    async fn register(&mut self) -> Result<Session, ConnectionError> {
        self.state = HandlerState::Registering;

        let line = match self.read_line().await {
            Ok(line) => line,
            Err(e) => {
                if e.is_per_line() {
                    self.notify(ServerNotice::InvalidUsername);
                }
                return Err(e);
            }
        };

        let username = match Username::parse(&line) {
            Ok(name) => name,
            Err(e) => {
                self.notify(ServerNotice::InvalidUsername);
                return Err(ConnectionError::InvalidUsername(e.to_string()));
            }
        };

        let session = Session::new(self.session_id, username.clone(), self.outbox.clone());

        match self.registry.register(session.clone()).await {
            Ok(()) => {
                info!(
                    session_id = %self.session_id,
                    username = %username,
                    "Client registered"
                );
                self.state = HandlerState::Active;
                Ok(session)
            }
            Err(RegistryError::NameTaken(name)) => {
                self.notify(ServerNotice::NameTaken(name.clone()));
                Err(ConnectionError::Rejected(RegistryError::NameTaken(name)))
            }
            Err(RegistryError::RegistryFull { max }) => {
                self.notify(ServerNotice::ChatFull { max });
                Err(ConnectionError::Rejected(RegistryError::RegistryFull { max }))
            }
            Err(e) => Err(ConnectionError::Rejected(e)),
        }
    }

    /// Main read loop for a registered member.
    ///
    /// Returns why the loop ended.
    async fn process_lines(&mut self, session: &Session) -> LeaveReason {
        loop {
            let line = match self.read_line().await {
                Ok(line) => line,
                Err(ConnectionError::Eof) => {
                    debug!(session_id = %self.session_id, "Client sent EOF");
                    return LeaveReason::Disconnected;
                }
                Err(ConnectionError::Closed) => {
                    return if self.shutdown.is_cancelled() {
                        LeaveReason::Shutdown
                    } else {
                        LeaveReason::DeliveryFailed
                    };
                }
                Err(e) if e.is_per_line() => {
                    warn!(session_id = %self.session_id, error = %e, "Dropping client line");
                    self.notify(ServerNotice::MessageRejected(e.to_string()));
                    continue;
                }
                Err(e) => {
                    debug!(session_id = %self.session_id, error = %e, "Read failed");
                    return LeaveReason::TransportError;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            match self.router.route(session, &line).await {
                Ok(routed) => {
                    debug!(session_id = %self.session_id, routed = ?routed, "Line routed");
                }
                Err(e) => {
                    warn!(
                        session_id = %self.session_id,
                        username = %session.username(),
                        error = %e,
                        "Error handling line"
                    );
                }
            }
        }
    }

    /// Reads a single line, without its line terminator.
    ///
    /// At most `max_line_length + 1` bytes of a line are kept. The rest of an
    /// over-long line is consumed from the reader's buffer chunk by chunk
    /// and dropped, so memory stays bounded however long the line is. Such
    /// a line, like a non-UTF-8 one, is reported as a per-line error and
    /// the caller can keep reading.
    async fn read_line(&mut self) -> Result<String, ConnectionError> {
        let closing = self.outbox.closing_token().clone();
        let keep = self.max_line_length.saturating_add(1);
        let mut buf = Vec::new();
        let mut size = 0usize;
        let mut terminated = false;

        loop {
            let available = tokio::select! {
                _ = closing.cancelled() => return Err(ConnectionError::Closed),
                result = self.reader.fill_buf() => {
                    result.map_err(|e| ConnectionError::Io(e.to_string()))?
                }
            };

            if available.is_empty() {
                // EOF: a partial last line still counts as a line
                if size == 0 {
                    return Err(ConnectionError::Eof);
                }
                break;
            }

            let (chunk, used) = match available.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    terminated = true;
                    (available.get(..end).unwrap_or_default(), end + 1)
                }
                None => (available, available.len()),
            };

            size = size.saturating_add(chunk.len());
            let room = keep.saturating_sub(buf.len());
            buf.extend(chunk.iter().take(room));
            self.reader.consume(used);

            if terminated {
                break;
            }
        }

        if terminated && size <= keep && buf.last() == Some(&b'\r') {
            buf.pop();
            size -= 1;
        }

        if size > self.max_line_length {
            return Err(ConnectionError::LineTooLong {
                size,
                max: self.max_line_length,
            });
        }

        String::from_utf8(buf).map_err(|_| ConnectionError::InvalidUtf8)
    }

    /// Sends a notice to this connection, ignoring failure.
    ///
    /// A failed delivery already marks the connection for teardown.
    fn notify(&self, notice: ServerNotice) {
        if let Err(e) = self.outbox.deliver(notice.to_string()) {
            debug!(session_id = %self.session_id, error = %e, "Failed to send notice");
        }
    }

    /// CLOSING: leave the registry, then release both halves.
    ///
    /// Returns the final state, always `Closed`.
    async fn close(mut self, registered: Option<(Session, LeaveReason)>) -> HandlerState {
        self.state = HandlerState::Closing;

        if let Some((session, reason)) = registered {
            let removed = self.registry.unregister(session.id(), reason).await;
            info!(
                session_id = %self.session_id,
                username = %session.username(),
                reason = %reason,
                removed,
                "Client disconnected"
            );
        }

        // Dropping the last outbox lets the writer flush what is queued and
        // shut the write half down.
        let Self {
            reader,
            outbox,
            mut writer_task,
            session_id,
            ..
        } = self;
        drop(outbox);
        drop(reader);

        match timeout(FLUSH_GRACE, &mut writer_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(session_id = %session_id, error = %e, "Writer task failed"),
            Err(_) => {
                debug!(session_id = %session_id, "Writer did not flush in time, aborting");
                writer_task.abort();
            }
        }

        debug!(session_id = %session_id, "Connection released");
        HandlerState::Closed
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Session closed")]
    Closed,

    #[error("Line too long: {size} bytes (max: {max})")]
    LineTooLong { size: usize, max: usize },

    #[error("Line is not valid UTF-8")]
    InvalidUtf8,

    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Registration rejected: {0}")]
    Rejected(RegistryError),
}

impl ConnectionError {
    /// Returns true for errors that only affect the line just read.
    pub fn is_per_line(&self) -> bool {
        matches!(self, Self::LineTooLong { .. } | Self::InvalidUtf8)
    }
}
