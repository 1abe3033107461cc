//! Carries out one classified client line.
//!
//! Classification itself lives in `relay_protocol::command`; this module
//! decides who receives what. Replies meant only for the sender are
//! written straight to the sender's own outbox. Anything that needs the
//! membership goes through the registry so it sees a consistent view.

use tracing::debug;

use relay_protocol::{chat_line, parse_line, Command, ServerNotice, PONG};

use crate::registry::{RegistryError, RegistryHandle};
use crate::session::{DeliveryError, Session};

/// What a routed line turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Private message delivered to its target.
    Private,

    /// Member listing sent to the sender.
    Listed {
        /// Members in the listing
        members: usize,
    },

    /// `PONG` sent to the sender.
    Pong,

    /// Nothing to do.
    Ignored,

    /// Chat line relayed to the other members.
    Broadcast {
        /// Members the line was queued for
        recipients: usize,
    },

    /// The sender was told why the line was not carried out.
    Rejected(ServerNotice),
}

/// Errors that stop a line from being routed at all.
///
/// These are per-line failures; the connection keeps running.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Reply to sender failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Routes lines from registered members.
#[derive(Clone)]
pub struct Router {
    registry: RegistryHandle,
}

impl Router {
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }

    /// Classifies `raw` as sent by `session` and acts on it.
    pub async fn route(&self, session: &Session, raw: &str) -> Result<Routed, RouteError> {
        let command = match parse_line(raw, session.username()) {
            Ok(command) => command,
            Err(e) => return reject(session, e.into()),
        };

        match command {
            Command::Private { target, text } => {
                match self.registry.send_private(session.id(), target, text).await {
                    Ok(()) => Ok(Routed::Private),
                    Err(RegistryError::UserNotFound(name)) => {
                        reject(session, ServerNotice::UserNotFound(name))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Command::List => {
                let roster = self.registry.snapshot().await;
                session.deliver_lines(&roster.lines())?;
                Ok(Routed::Listed {
                    members: roster.len(),
                })
            }
            Command::Ping => {
                session.deliver(PONG)?;
                Ok(Routed::Pong)
            }
            Command::Empty => Ok(Routed::Ignored),
            Command::Broadcast(text) => {
                let line = chat_line(session.username(), &text);
                let recipients = self.registry.broadcast(session.id(), line).await?;
                debug!(
                    session_id = %session.id(),
                    recipients,
                    "Message broadcast"
                );
                Ok(Routed::Broadcast { recipients })
            }
        }
    }
}

fn reject(session: &Session, notice: ServerNotice) -> Result<Routed, RouteError> {
    debug!(session_id = %session.id(), notice = %notice, "Command rejected");
    session.deliver(notice.to_string())?;
    Ok(Routed::Rejected(notice))
}
