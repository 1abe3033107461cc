//! chatrelay daemon - session registry and message routing server
//!
//! This crate provides the core infrastructure for the relay daemon:
//! - `registry` - Registry actor owning the live membership and leader
//! - `router` - Carries out classified client lines
//! - `session` - Per-connection outbound queue and registered member state
//! - `server` - TCP listener and per-connection session handlers
//! - `config` - TOML configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         relayd                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   RelayServer   │     │       RegistryActor         │   │
//! │  │  (TcpListener)  │     │  (members + leader owner)   │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │ connections                 ▲ │                 │
//! │           ▼                   commands  │ │ notices         │
//! │  ┌─────────────────┐                    │ ▼                 │
//! │  │ SessionHandler  │────────────────────┘ Outbox (per      │
//! │  │  + Router       │                      member writer)   │
//! │  └─────────────────┘                                        │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
