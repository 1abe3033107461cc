//! chatrelay protocol - the newline-delimited text protocol
//!
//! This crate owns both directions of the wire format:
//! - `command` - classifying a line a registered client sent
//! - `notice` - every line the server originates (system notices, listings,
//!   private message and chat formatting)
//!
//! There is no binary framing: one line is one message.

pub mod command;
pub mod notice;

pub use command::{parse_line, strip_self_prefix, Command, CommandError};
pub use notice::{
    chat_line, private_from, private_to, roster_lines, welcome_lines, ServerNotice, PONG,
    SERVER_PREFIX,
};
