//! Server-originated lines.
//!
//! System notices carry the `SERVER: ` prefix. Replies that belong to a
//! client action (`PONG`, private message echoes, relayed chat) are plain
//! lines with their own fixed shapes.

use std::fmt;

use relay_core::Username;

use crate::CommandError;

/// Prefix for every system notice.
pub const SERVER_PREFIX: &str = "SERVER: ";

/// Reply to `PING`.
pub const PONG: &str = "PONG";

/// A system notice sent by the relay itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerNotice {
    /// First line after a successful registration.
    Welcome(String),

    /// Help block header.
    CommandsHeader,

    /// Help line for private messages.
    HelpPrivate,

    /// Help line for the member listing.
    HelpList,

    /// Sent to a newly registered member when a leader exists.
    CurrentLeader(String),

    /// A member registered.
    Joined(String),

    /// A member left or was dropped.
    Left(String),

    /// The derived leader changed.
    NewLeader(String),

    /// Registration rejected: the name is live already.
    NameTaken(String),

    /// Registration rejected: the name cannot be used.
    InvalidUsername,

    /// Registration rejected: the registry is at capacity.
    ChatFull {
        /// Configured capacity
        max: usize,
    },

    /// Private message target is not online.
    UserNotFound(String),

    /// A command line could not be carried out.
    Command(CommandError),

    /// A line was dropped before classification.
    MessageRejected(String),

    /// Header of the member listing.
    RosterHeader {
        /// Number of members listed below
        count: usize,
    },
}

impl fmt::Display for ServerNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(SERVER_PREFIX)?;
        match self {
            Self::Welcome(name) => write!(f, "Welcome {name}"),
            Self::CommandsHeader => write!(f, "Commands:"),
            Self::HelpPrivate => write!(f, "- @username message (private message)"),
            Self::HelpList => write!(f, "- LIST (show online users)"),
            Self::CurrentLeader(name) => write!(f, "Current leader is {name}"),
            Self::Joined(name) => write!(f, "{name} has joined the chat"),
            Self::Left(name) => write!(f, "{name} has left the chat"),
            Self::NewLeader(name) => write!(f, "New leader elected - {name}"),
            Self::NameTaken(name) => {
                write!(f, "Username '{name}' already taken. Disconnecting...")
            }
            Self::InvalidUsername => write!(f, "Invalid username. Disconnecting..."),
            Self::ChatFull { max } => {
                write!(f, "Chat is full (max {max} users). Disconnecting...")
            }
            Self::UserNotFound(name) => write!(f, "User '{name}' not found or offline"),
            Self::Command(err) => write!(f, "{err}"),
            Self::MessageRejected(reason) => write!(f, "Message rejected: {reason}"),
            Self::RosterHeader { count } => write!(f, "Online users ({count}):"),
        }
    }
}

impl From<CommandError> for ServerNotice {
    fn from(err: CommandError) -> Self {
        Self::Command(err)
    }
}

/// A relayed chat line as the other members see it.
pub fn chat_line(sender: &Username, text: &str) -> String {
    format!("{sender}: {text}")
}

/// Private message as the recipient sees it.
pub fn private_from(sender: &Username, text: &str) -> String {
    format!("[PM from {sender}]: {text}")
}

/// Private message confirmation as the sender sees it.
pub fn private_to(target: &str, text: &str) -> String {
    format!("[PM to {target}]: {text}")
}

/// Lines sent to a member right after registration.
pub fn welcome_lines(name: &Username, leader: Option<&Username>) -> Vec<String> {
    let mut lines = vec![
        ServerNotice::Welcome(name.to_string()).to_string(),
        ServerNotice::CommandsHeader.to_string(),
        ServerNotice::HelpPrivate.to_string(),
        ServerNotice::HelpList.to_string(),
    ];
    if let Some(leader) = leader {
        lines.push(ServerNotice::CurrentLeader(leader.to_string()).to_string());
    }
    lines
}

/// The member listing: a header with the count, then one line per member.
pub fn roster_lines(members: &[Username], leader: Option<&Username>) -> Vec<String> {
    let mut lines = Vec::with_capacity(members.len() + 1);
    lines.push(ServerNotice::RosterHeader { count: members.len() }.to_string());
    for member in members {
        if leader == Some(member) {
            lines.push(format!("- {member} (Leader)"));
        } else {
            lines.push(format!("- {member}"));
        }
    }
    lines
}
