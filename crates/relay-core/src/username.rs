//! Display names chosen by clients during registration.

use std::cmp::Ordering;
use std::fmt;

use crate::{DomainError, DomainResult};

/// A validated, trimmed display name.
///
/// Equality via `==` is exact. Everything that decides identity in the chat
/// (uniqueness, private-message lookup, leader ordering) goes through the
/// case-insensitive helpers instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Username(String);

impl Username {
    /// Parses the raw first line a client sends into a username.
    ///
    /// Surrounding whitespace is trimmed. The result must be non-empty and
    /// must not contain whitespace, since a private message target is the
    /// token between `@` and the first whitespace character.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(DomainError::EmptyUsername);
        }
        if name.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidUsername {
                value: name.to_string(),
                reason: "must not contain whitespace".to_string(),
            });
        }
        Ok(Self(name.to_string()))
    }

    /// Returns the name as the client typed it.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased form used for case-insensitive comparison.
    pub fn folded(&self) -> String {
        self.0.to_lowercase()
    }

    /// Case-insensitive equality against another name.
    pub fn eq_ignore_case(&self, other: &str) -> bool {
        self.0 == other || self.0.to_lowercase() == other.to_lowercase()
    }

    /// Case-insensitive lexicographic ordering.
    pub fn cmp_ignore_case(&self, other: &Username) -> Ordering {
        self.folded().cmp(&other.folded())
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
