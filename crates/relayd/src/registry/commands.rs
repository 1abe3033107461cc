//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `MembershipEvent`: Events published by the registry for observers
//!
//! All types are designed for async message passing and follow the panic-free policy.

use std::fmt;

use relay_core::{SessionId, Username};
use relay_protocol::roster_lines;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::session::Session;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// The actor handles one command at a time, so each command is one
/// critical section: a join's uniqueness check, insert, leader
/// recomputation and notices all happen before the next command is looked
/// at. Commands that need an answer carry a oneshot sender.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Admit a session if its name is free.
    ///
    /// # Errors
    /// - `RegistryError::NameTaken` if a live member has the same name ignoring case
    /// - `RegistryError::RegistryFull` if at maximum capacity
    Register {
        /// The session to admit (boxed to keep the enum small)
        session: Box<Session>,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Remove a session. Idempotent: answers `false` if it was not a member.
    Unregister {
        /// ID of the session to remove
        session_id: SessionId,
        /// Why the session is leaving
        reason: LeaveReason,
        /// Channel to send whether the session was a member
        respond_to: oneshot::Sender<bool>,
    },

    /// Read the current membership and leader.
    Snapshot {
        /// Channel to send the roster
        respond_to: oneshot::Sender<Roster>,
    },

    /// Deliver a line to every member except the sender.
    Broadcast {
        /// Member the line came from (excluded from delivery)
        from: SessionId,
        /// Fully formatted line
        line: String,
        /// Channel to send the number of successful deliveries
        respond_to: oneshot::Sender<usize>,
    },

    /// Deliver a private message and its confirmation.
    ///
    /// # Errors
    /// - `RegistryError::UserNotFound` if no member matches `target` ignoring case
    /// - `RegistryError::NotRegistered` if the sender already left
    SendPrivate {
        /// Sending member
        from: SessionId,
        /// Target name as typed by the sender
        target: String,
        /// Message payload
        text: String,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A live member already uses this name (compared ignoring case).
    #[error("username already taken: {0}")]
    NameTaken(String),

    /// The registry has reached its maximum session capacity.
    #[error("registry is full (max: {max} sessions)")]
    RegistryFull {
        /// Maximum number of sessions allowed
        max: usize,
    },

    /// Private message target is not a live member.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The session issuing the command is not a member.
    #[error("session not registered: {0}")]
    NotRegistered(SessionId),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Roster
// ============================================================================

/// Membership at one instant, in join order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    /// Member names in join order
    pub members: Vec<Username>,
    /// Current leader, absent when there are no members
    pub leader: Option<Username>,
}

impl Roster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Formats the roster as the `LIST` reply.
    pub fn lines(&self) -> Vec<String> {
        roster_lines(&self.members, self.leader.as_ref())
    }
}

// ============================================================================
// Membership Events
// ============================================================================

/// Events published by the registry for in-process observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    /// A session registered.
    Joined {
        session_id: SessionId,
        username: Username,
    },

    /// A session was removed.
    Left {
        session_id: SessionId,
        username: Username,
        reason: LeaveReason,
    },

    /// The derived leader changed. `None` once the registry is empty.
    LeaderChanged { leader: Option<Username> },
}

/// Reason a session left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// Client closed its end of the connection.
    Disconnected,

    /// Reading from the connection failed.
    TransportError,

    /// A write to the session failed or its queue overflowed.
    DeliveryFailed,

    /// The server is shutting down.
    Shutdown,
}

impl fmt::Display for LeaveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "client disconnected"),
            Self::TransportError => write!(f, "transport error"),
            Self::DeliveryFailed => write!(f, "delivery failed"),
            Self::Shutdown => write!(f, "server shutdown"),
        }
    }
}
