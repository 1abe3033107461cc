//! Session registry using Actor pattern.
//!
//! The registry is the single source of truth for who is in the chat. It
//! receives commands via a tokio mpsc channel, so every membership change
//! runs as one uninterrupted step inside the actor task.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ SessionHandler  │────▶│  RegistryActor  │────▶│ Session outboxes │
//! │  (per client)   │     │                 │     │  (per member)    │
//! └─────────────────┘     └────────┬────────┘     └──────────────────┘
//!         │                        │
//!         │   RegistryCommand      │   MembershipEvent
//!         │   (mpsc channel)       │   (broadcast)
//!         ▼                        ▼
//!  Register / Unregister     Vec<Session> +        in-process
//!  Broadcast / Private       derived leader        observers
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;

pub use actor::{RegistryActor, DEFAULT_MAX_SESSIONS};
pub use commands::{LeaveReason, MembershipEvent, RegistryCommand, RegistryError, Roster};
pub use handle::RegistryHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Spawn the registry actor and return a handle for interaction.
///
/// The actor stops once every handle has been dropped.
///
/// # Example
///
/// ```no_run
/// use relayd::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry(100);
///
///     let roster = handle.snapshot().await;
///     assert!(roster.is_empty());
/// }
/// ```
pub fn spawn_registry(max_sessions: usize) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone(), max_sessions);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
