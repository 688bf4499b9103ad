//! WhatsApp HTTP Relay - Main Entry Point
//!
//! 1. Connects one WhatsApp Web session (reconnecting unless logged out)
//! 2. Forwards received messages to the chat API
//! 3. Serves `POST /send` to send messages through the session

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use whatsapp_relay::gateway;
use whatsapp_relay::prelude::*;
use whatsapp_relay::sidecar::SidecarBackend;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,whatsapp_relay=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 WhatsApp Relay starting...");

    // Load configuration
    let config = RelayConfig::from_env()?;
    info!("📋 Configuration loaded");

    // Create shared state
    let slot = Arc::new(SessionSlot::new());
    let store = Arc::new(FileCredentialStore::new(&config.auth_dir));
    let backend = Arc::new(SidecarBackend::from_config(&config));
    let forwarder = Arc::new(InboundForwarder::from_config(&config)?);
    info!("📨 Forwarding inbound messages to {}", forwarder.url());

    let connector = Arc::new(SessionConnector::new(
        backend,
        store,
        slot.clone(),
        forwarder,
        ReconnectPolicy::from_config(&config),
    ));

    // Start the WhatsApp session; the connection opens in the background
    connector.start().await;

    // Spawn HTTP server
    let addr: SocketAddr = config
        .listen_addr()
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.listen_addr()))?;
    let server = spawn_gateway_server(addr, slot);

    if let Err(e) = server.await {
        tracing::error!("Gateway task failed: {}", e);
    }

    info!("✅ WhatsApp Relay stopped");
    Ok(())
}

/// Resolves on Ctrl-C
async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("📢 Shutdown signal received"),
        Err(err) => tracing::error!("Unable to listen for shutdown signal: {}", err),
    }
    info!("🛑 Shutting down...");
}

/// Spawn the gateway HTTP server
fn spawn_gateway_server(
    addr: SocketAddr,
    slot: Arc<SessionSlot>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = gateway::run_server(addr, slot, shutdown_signal()).await {
            tracing::error!("Gateway server error: {}", e);
        }
    })
}
