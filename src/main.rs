//! # courier
//!
//! Hub server binary: loads settings, initializes logging and metrics, wires
//! the in-memory chat service and user directory, and serves until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use courier_hub::{AuthGate, CourierServer, Hub, HubConfig, InMemoryChatService, InMemoryUserDirectory};
use courier_settings::{CourierSettings, load_settings_from_path, settings_path};

/// Courier messaging hub.
#[derive(Parser, Debug)]
#[command(name = "courier", about = "STOMP-style WebSocket messaging hub")]
struct Cli {
    /// Settings file (defaults to `$COURIER_CONFIG` or `./courier.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,
}

impl Cli {
    fn apply(&self, settings: &mut CourierSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let path = args.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply(&mut settings);

    courier_logging::init_subscriber(&settings.logging.level, settings.logging.format);
    if !settings.auth.has_secret() {
        tracing::warn!("auth.jwtSecret is empty, every CONNECT will be rejected");
    }

    let metrics = courier_hub::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let users = Arc::new(InMemoryUserDirectory::new());
    let chat = Arc::new(InMemoryChatService::new(users.clone()));
    let hub = Arc::new(Hub::new(
        HubConfig::from_settings(&settings.server),
        AuthGate::from_settings(&settings.auth),
        chat,
        users,
    ));

    let handle = CourierServer::new(settings.server, hub)
        .with_metrics(metrics)
        .start()
        .await
        .context("Failed to start server")?;
    tracing::info!(port = handle.port(), "courier ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");
    handle.shutdown().await;
    Ok(())
}
