//! Grid Sync Server entry point
//!
//! Loads configuration, builds the shared world, starts the broadcast ticker
//! and serves WebSocket viewers until Ctrl+C or SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use grid_sync_server::app::AppState;
use grid_sync_server::config::Config;
use grid_sync_server::http::build_router;
use grid_sync_server::util::time::init_server_time;
use grid_sync_server::ws::protocol::{encode, ServerMsg};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Grid Sync Server");
    info!("Server address: {}", config.server_addr);
    info!(
        tick_ms = config.tick_interval.as_millis() as u64,
        motion_mode = ?config.world.motion_mode,
        binding = ?config.binding,
        "Engine configuration"
    );

    // Create application state
    let state = AppState::new(config.clone())?;

    // Start the broadcast ticker
    let mut ticker = state.ticker().start();

    // Build router
    let router = build_router(state.clone());

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let the in-flight tick finish, then tell viewers we are going away
    ticker.stop().await;
    let farewell = encode(&ServerMsg::Shutdown)?;
    let report = state.registry.broadcast(Arc::from(farewell));
    info!(sessions = report.delivered, "Sent shutdown notice");

    // Each writer finishes or gives up within one send timeout
    tokio::time::sleep(config.send_timeout).await;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
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
