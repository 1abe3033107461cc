//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Username was empty after trimming
    #[error("Username must not be empty")]
    EmptyUsername,

    /// Username contains characters that break command parsing
    #[error("Invalid username {value:?}: {reason}")]
    InvalidUsername { value: String, reason: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
