//! TCP server for the relay daemon.
//!
//! The server:
//! - Listens on a TCP address for client connections
//! - Spawns a SessionHandler task for each client
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayServer   │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ SessionHandler  │────▶│  RegistryHandle │
//! │   (per client)  │     │                 │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Accept errors are logged and allow continued operation

mod connection;

pub use connection::{ConnectionError, HandlerState, SessionHandler};

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use relay_core::SessionId;

use crate::config::RelayConfig;
use crate::registry::RegistryHandle;

/// TCP server for the relay daemon.
pub struct RelayServer {
    /// Bound listener
    listener: TcpListener,

    /// Handle to the session registry
    registry: RegistryHandle,

    /// Limits passed to every handler
    config: RelayConfig,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating session IDs
    connection_counter: AtomicU64,
}

impl RelayServer {
    /// Binds the listener described by `config.bind`.
    ///
    /// # Arguments
    ///
    /// * `config` - Daemon configuration
    /// * `registry` - Handle to the session registry
    /// * `cancel_token` - Token for graceful shutdown
    pub async fn bind(
        config: RelayConfig,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind)
            .await
            .map_err(|e| ServerError::Bind {
                addr: config.bind.clone(),
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            registry,
            config,
            cancel_token,
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Io)
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered, then
    /// waits for every connection handler to finish its teardown.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(addr = ?self.listener.local_addr().ok(), "Relay server listening");

        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                // Check for cancellation
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                // Accept new connection
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            debug!(peer = %peer, connection = conn_num, "Accepted connection");
                            self.handle_connection(&mut handlers, stream, SessionId::new(conn_num));
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }

                // Reap finished handlers so the set does not grow unbounded
                Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
            }
        }

        // Every handler's token is a child of ours, so they are all closing
        let remaining = handlers.len();
        while handlers.join_next().await.is_some() {}
        info!(connections = remaining, "Server stopped");
        Ok(())
    }

    /// Spawns a handler task for a new client connection.
    fn handle_connection(
        &self,
        handlers: &mut JoinSet<()>,
        stream: TcpStream,
        session_id: SessionId,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(session_id = %session_id, error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let handler = SessionHandler::new(
            reader,
            writer,
            self.registry.clone(),
            session_id,
            &self.config,
            &self.cancel_token,
        );

        handlers.spawn(async move {
            if let Some(username) = handler.run().await {
                debug!(session_id = %session_id, username = %username, "Handler finished");
            }
        });
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
