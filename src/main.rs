//! Reach24 Room Server
//!
//! Reads configuration from the environment and serves rooms over WebSocket
//! until Ctrl-C.

use std::sync::Arc;
use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reach24::{GameServer, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    info!("Reach24 Server v{}", config.version);
    info!(
        "Round: {}s, buzz window: {}s, race rooms: 1..={}, moves: {:?}",
        config.room.round_secs,
        config.room.buzz_secs,
        config.room.race_rooms,
        config.room.move_policy
    );

    let server = Arc::new(GameServer::new(config));

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                signal_server.shutdown();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run().await.context("game server failed")?;
    info!("Server stopped");
    Ok(())
}
