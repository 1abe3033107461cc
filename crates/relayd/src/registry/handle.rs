//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor and subscribing to membership events.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use tokio::sync::{broadcast, mpsc, oneshot};

use relay_core::SessionId;

use super::commands::{LeaveReason, MembershipEvent, RegistryCommand, RegistryError, Roster};
use crate::session::Session;

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that is injected into every connection
/// handler. All methods are async and communicate with the actor via
/// channels; none of them wait on client sockets.
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<MembershipEvent>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    ///
    /// # Arguments
    ///
    /// * `sender` - The command channel sender for communicating with the actor
    /// * `event_sender` - The broadcast sender for subscribing to events
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<MembershipEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Admit a session under its username.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NameTaken` if the name is live (ignoring case)
    /// - `RegistryError::RegistryFull` if the registry is at maximum capacity
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register(&self, session: Session) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Register {
                session: Box::new(session),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Remove a session.
    ///
    /// Returns true if the session was a member. Returns false if it was
    /// not, or if the actor has shut down.
    pub async fn unregister(&self, session_id: SessionId, reason: LeaveReason) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Unregister {
                session_id,
                reason,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    /// Current membership and leader.
    ///
    /// Returns an empty roster if communication with the actor fails.
    pub async fn snapshot(&self) -> Roster {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Snapshot { respond_to: tx })
            .await
            .is_err()
        {
            return Roster::default();
        }

        rx.await.unwrap_or_default()
    }

    /// Deliver `line` to every member except `from`.
    ///
    /// Returns how many members the line was queued for.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn broadcast(
        &self,
        from: SessionId,
        line: impl Into<String>,
    ) -> Result<usize, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Broadcast {
                from,
                line: line.into(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Deliver a private message from `from` to the member named `target`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::UserNotFound` if no live member has that name
    /// - `RegistryError::NotRegistered` if `from` is not a member
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn send_private(
        &self,
        from: SessionId,
        target: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::SendPrivate {
                from,
                target: target.into(),
                text: text.into(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Subscribe to membership events.
    ///
    /// Returns a receiver that will receive all future events.
    /// Events published before subscribing are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the registry actor is still running.
    ///
    /// Returns false if the command channel is closed.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
