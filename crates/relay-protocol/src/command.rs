//! Classification of client lines.
//!
//! Every line from a registered client passes through one ordered pipeline:
//!
//! 1. Strip a doubled self-prefix `"<name>: <name>: "`.
//! 2. Strip a single self-prefix `"<name>:"` and trim, or just trim.
//! 3. Classify: `@` private message, `LIST`, `PING`, empty, or broadcast.
//!
//! Some clients echo their own prefix back; the first two stages undo that.
//! Prefix matching is exact (case-sensitive) against the sender's name.

use relay_core::Username;
use thiserror::Error;

/// A classified client line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `@<target> <text>` - deliver to one member.
    Private {
        /// Target name exactly as typed (resolved case-insensitively)
        target: String,
        /// Payload, trimmed and non-empty
        text: String,
    },

    /// `LIST` in any case - list online members.
    List,

    /// `PING` in any case - liveness check.
    Ping,

    /// Nothing left after sanitizing - dropped silently.
    Empty,

    /// Anything else - relayed to every other member.
    Broadcast(String),
}

/// A line that looked like a command but could not be carried out.
///
/// The `Display` text is what the sender sees after the `SERVER: ` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// `@` without a target and a separating space.
    #[error("Invalid private message format. Use @username message")]
    MalformedPrivate,

    /// `@target` followed only by whitespace.
    #[error("Message cannot be empty")]
    EmptyPrivate,
}

/// Removes self-applied username prefixes from a raw line.
///
/// Returns the text the classifier should look at. The result is always
/// trimmed.
pub fn strip_self_prefix<'a>(raw: &'a str, username: &str) -> &'a str {
    let doubled = format!("{username}: {username}: ");
    let line = raw.strip_prefix(doubled.as_str()).unwrap_or(raw);

    let single = format!("{username}:");
    match line.strip_prefix(single.as_str()) {
        Some(rest) => rest.trim(),
        None => line.trim(),
    }
}

/// Runs the full pipeline on one raw line sent by `username`.
pub fn parse_line(raw: &str, username: &Username) -> Result<Command, CommandError> {
    let text = strip_self_prefix(raw, username.as_str());

    if let Some(rest) = text.strip_prefix('@') {
        return parse_private(rest);
    }
    if text.eq_ignore_ascii_case("LIST") {
        return Ok(Command::List);
    }
    if text.eq_ignore_ascii_case("PING") {
        return Ok(Command::Ping);
    }
    if text.is_empty() {
        return Ok(Command::Empty);
    }
    Ok(Command::Broadcast(text.to_string()))
}

/// Splits `<target> <text>` (the part after `@`).
fn parse_private(rest: &str) -> Result<Command, CommandError> {
    let split = rest
        .find(char::is_whitespace)
        .ok_or(CommandError::MalformedPrivate)?;
    let (target, payload) = rest.split_at(split);

    if target.is_empty() {
        return Err(CommandError::MalformedPrivate);
    }

    let text = payload.trim();
    if text.is_empty() {
        return Err(CommandError::EmptyPrivate);
    }

    Ok(Command::Private {
        target: target.to_string(),
        text: text.to_string(),
    })
}
