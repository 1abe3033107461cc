//! Per-connection outbound path and registered session state.
//!
//! Every connection owns one bounded queue of outgoing lines drained by a
//! single writer task. That task is the only code touching the socket's
//! write half, so lines from the registry, the router and the handler can
//! never interleave mid-line, and nobody holds a lock across a write.
//!
//! A delivery that cannot be queued (queue full or writer gone) or a write
//! that fails marks the session dead by cancelling its `closing` token. The
//! connection handler watches that token and runs the normal teardown.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel closure is reported as `DeliveryError`, never panics

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use relay_core::{SessionId, Username};

/// Default number of queued outbound lines per session.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// How long teardown waits for queued lines to flush before dropping the
/// write half.
pub const FLUSH_GRACE: Duration = Duration::from_secs(2);

/// Why an outbound line could not be handed to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("outbound queue full ({capacity} lines)")]
    Backlogged { capacity: usize },

    #[error("connection writer closed")]
    Closed,
}

/// Sending side of one connection's outbound queue.
///
/// Cheap to clone. All clones share the same queue and the same `closing`
/// token.
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: mpsc::Sender<String>,
    closing: CancellationToken,
    capacity: usize,
}

impl Outbox {
    /// Queues one line (without its trailing newline).
    ///
    /// On failure the connection is marked for teardown before returning.
    ///
    /// Never waits. A full queue is treated the same as a dead writer, so a
    /// client that stops reading for longer than the queue capacity is
    /// disconnected rather than allowed to stall the registry or the
    /// sender. Raise `outbound_buffer` to tolerate slower readers.
    pub fn deliver(&self, line: impl Into<String>) -> Result<(), DeliveryError> {
        match self.sender.try_send(line.into()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.closing.cancel();
                Err(DeliveryError::Backlogged {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => {
                self.closing.cancel();
                Err(DeliveryError::Closed)
            }
        }
    }

    /// Queues several lines as one unit so nothing else lands between them.
    pub fn deliver_lines(&self, lines: &[String]) -> Result<(), DeliveryError> {
        if lines.is_empty() {
            return Ok(());
        }
        self.deliver(lines.join("\n"))
    }

    /// Marks the connection for teardown.
    pub fn close(&self) {
        self.closing.cancel();
    }

    /// Returns true once the connection has been marked for teardown.
    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Token cancelled when the connection must close.
    pub fn closing_token(&self) -> &CancellationToken {
        &self.closing
    }
}

/// Creates a connection's outbox and spawns the writer task draining it.
///
/// The writer exits when every `Outbox` clone has been dropped (after
/// flushing what is queued) or when a write fails. Either way it shuts the
/// write half down before returning.
pub fn spawn_writer<W>(
    writer: W,
    session_id: SessionId,
    capacity: usize,
    closing: CancellationToken,
) -> (Outbox, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let capacity = capacity.max(1);
    let (sender, receiver) = mpsc::channel(capacity);
    let outbox = Outbox {
        sender,
        closing: closing.clone(),
        capacity,
    };
    let task = tokio::spawn(run_writer(writer, receiver, session_id, closing));
    (outbox, task)
}

async fn run_writer<W>(
    writer: W,
    mut receiver: mpsc::Receiver<String>,
    session_id: SessionId,
    closing: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut writer = BufWriter::new(writer);

    while let Some(line) = receiver.recv().await {
        let result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(e) = result {
            debug!(session_id = %session_id, error = %e, "Write failed, closing session");
            closing.cancel();
            break;
        }
        trace!(session_id = %session_id, bytes = line.len(), "Line written");
    }

    if let Err(e) = writer.shutdown().await {
        debug!(session_id = %session_id, error = %e, "Error shutting down writer");
    }
}

/// A registered chat member.
///
/// Created once the name-registration handshake succeeds. Clones are held
/// by the registry and by the member's own connection handler.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    username: Username,
    joined_at: DateTime<Utc>,
    outbox: Outbox,
}

impl Session {
    pub fn new(id: SessionId, username: Username, outbox: Outbox) -> Self {
        Self {
            id,
            username,
            joined_at: Utc::now(),
            outbox,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    pub fn joined_at(&self) -> DateTime<Utc> {
        self.joined_at
    }

    /// Writes one line to this member's connection.
    ///
    /// A failure means the member is gone; its teardown is already
    /// triggered by the time this returns.
    pub fn deliver(&self, line: impl Into<String>) -> Result<(), DeliveryError> {
        self.outbox.deliver(line)
    }

    /// Writes several lines with nothing interleaved.
    pub fn deliver_lines(&self, lines: &[String]) -> Result<(), DeliveryError> {
        self.outbox.deliver_lines(lines)
    }

    pub fn is_closing(&self) -> bool {
        self.outbox.is_closing()
    }
}
