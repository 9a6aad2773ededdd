//! Vote Dodger Server - crowd-steered obstacle dodger
//!
//! This is the main entry point for one game instance. It handles:
//! - Vote aggregation over the shared store
//! - Game master election between instances
//! - The authoritative simulation loop while this instance drives
//! - HTTP and WebSocket endpoints for viewers

mod app;
mod config;
mod game;
mod http;
mod market;
mod store;
mod util;
mod voting;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::{Config, LogFormat};
use crate::http::build_router;
use crate::store::{FirebaseStore, MemoryStore, SharedStore};
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level, config.log_format);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Vote Dodger Server");
    info!("Server address: {}", config.server_addr);

    // Shared store backend
    let backend: Arc<dyn SharedStore> = match &config.firebase_url {
        Some(url) => {
            info!(url = %url, "Using realtime database store");
            Arc::new(FirebaseStore::new(url, config.firebase_auth.clone()))
        }
        None => {
            warn!("FIREBASE_URL not set, running single-instance on the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // Create application state and spawn the instance's services
    let state = AppState::start(config.clone(), backend);

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
