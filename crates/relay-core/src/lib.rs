//! chatrelay core - shared domain types for the relay daemon
//!
//! This crate provides the identity types shared between the line protocol
//! (`relay-protocol`) and the daemon (`relayd`), plus the pure leader
//! selection rule.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod leader;
pub mod session;
pub mod username;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use leader::select_leader;
pub use session::SessionId;
pub use username::Username;
