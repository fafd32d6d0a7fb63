//! # matchday-server
//!
//! Messaging server for the Matchday team-matching app.
//!
//! This binary provides:
//! - **Message store** (SQLite) holding direct messages and read flags
//! - **REST API** (axum) for sending, polling history, read state and unread counts
//! - **Live channel** (WebSocket) pushing new messages, typing indicators and
//!   read receipts to the two participants of a room
//! - **Per-participant send throttling**

mod api;
mod auth;
mod config;
mod delivery;
mod error;
mod hub;
mod read_state;
mod store;
mod throttle;
mod typing;
mod ws;

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::store::MessageStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,matchday_server=debug")),
        )
        .init();

    info!("Starting Matchday server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(
        instance = %config.instance_name,
        live_channel = config.live_channel,
        admin_enabled = config.admin_token.is_some(),
        "Instance settings"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let store = MessageStore::open(&config.database_path)?;
    info!(path = %config.database_path.display(), "Message store ready");

    let http_addr = config.http_addr;
    let app_state = AppState::new(store, config);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Typing indicator expiry (every second)
    let typing = app_state.typing.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            typing.sweep_expired().await;
        }
    });

    // Send throttle cleanup (every 5 minutes, evict buckets idle >10 min)
    let throttle = app_state.throttle.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            throttle.purge_stale(Duration::from_secs(600)).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
