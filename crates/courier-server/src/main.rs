//! # courier-server
//!
//! Real-time text messaging server.
//!
//! This binary provides:
//! - **Chat listener**: newline-delimited JSON over TCP, one task per
//!   connection, with live fan-out of new messages to online participants
//! - **Persistence** of users, sessions, groups, chats and history in SQLite
//! - **REST API** (axum) for health checks and instance information
//! - **Per-IP rate limiting** on both surfaces

mod api;
mod auth;
mod config;
mod connection;
mod directory;
mod error;
mod listener;
mod rate_limit;
mod registry;
mod router;
mod state;
mod store;

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use courier_shared::constants::APP_NAME;
use courier_store::Database;

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,courier_server=debug")),
        )
        .init();

    info!("Starting {} server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the database and build shared services
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };

    let listen_addr = config.listen_addr;
    let http_addr = config.http_addr;
    let state = AppState::new(config, db)?;

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // Periodic session expiry (hourly)
    let auth = state.auth.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match auth.expire_stale().await {
                Ok(0) => {}
                Ok(expired) => info!(expired, "Expired stale sessions"),
                Err(e) => tracing::error!(error = %e, "Session expiry failed"),
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Bind the chat listener and run both servers until shutdown
    // -----------------------------------------------------------------------
    let chat_listener = tokio::net::TcpListener::bind(listen_addr).await?;

    tokio::select! {
        result = listener::serve(chat_listener, state.clone()) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Chat listener failed");
                return Err(e);
            }
        }
        result = api::serve(state, http_addr) => {
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
