//! chatrelay daemon - line-oriented chat relay
//!
//! Accepts TCP clients, registers each under a unique name and relays
//! broadcast and private messages between them.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default address (127.0.0.1:5555)
//! relayd
//!
//! # Listen elsewhere
//! relayd --bind 0.0.0.0:7000
//! RELAY_BIND=0.0.0.0:7000 relayd
//!
//! # Use a specific config file
//! relayd --config /etc/chatrelay/relayd.toml
//!
//! # Enable debug logging
//! RUST_LOG=relayd=debug relayd
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown (every client is unregistered)

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relayd::config::{RelayConfig, BIND_ENV};
use relayd::registry::spawn_registry;
use relayd::server::RelayServer;

/// chatrelay daemon - multi-client chat relay
#[derive(Parser, Debug)]
#[command(name = "relayd", version, about)]
struct Args {
    /// Address to listen on (overrides the config file)
    #[arg(short, long, env = BIND_ENV)]
    bind: Option<String>,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Loads the config file named on the command line, or the default one if
/// it exists.
fn load_config(args: &Args) -> Result<RelayConfig> {
    let config = match &args.config {
        Some(path) => RelayConfig::load(path)?
            .with_context(|| format!("Config file not found: {}", path.display()))?,
        None => match RelayConfig::default_path() {
            Some(path) => RelayConfig::load(&path)?.unwrap_or_default(),
            None => RelayConfig::default(),
        },
    };

    let config = config.with_bind(args.bind.clone());
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("relayd=info".parse()?)
                .add_directive("relay_core=info".parse()?)
                .add_directive("relay_protocol=info".parse()?),
        )
        .init();

    let config = load_config(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        bind = %config.bind,
        max_sessions = config.max_sessions,
        "Relay daemon starting"
    );

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Setup signal handlers
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let registry = spawn_registry(config.max_sessions);
    info!("Session registry started");

    let server = RelayServer::bind(config, registry, cancel_token)
        .await
        .context("Failed to start server")?;

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Relay daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
