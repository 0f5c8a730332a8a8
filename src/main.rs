//! Arena Simulation Server - Authoritative real-time movement server
//!
//! This is the main entry point for the simulation server. It handles:
//! - WebSocket connections for participant input and state broadcast
//! - The fixed-rate simulation loop with optional rigid-body physics
//! - A health endpoint exposing loop diagnostics

mod app;
mod config;
mod game;
mod http;
mod util;
mod ws;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::game::{GameHandle, GameManager, PhysicsWorld};
use crate::http::build_router;
use crate::util::time::init_server_time;

/// Capacity of the event queue feeding the simulation loop
const EVENT_BUFFER: usize = 1024;

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

    info!("Starting Arena Simulation Server");
    info!("Server address: {}", config.server_addr);

    // Physics is optional; participants fall back to kinematic movement
    let mut physics = PhysicsWorld::new();
    if let Err(e) = physics.initialize(config.physics_enabled) {
        warn!(error = %e, "Physics unavailable, using kinematic movement");
    }

    let seed = config.sim_seed.unwrap_or_else(rand::random);
    info!(seed, physics = physics.is_enabled(), "Simulation configured");

    // Spawn the simulation loop
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let game = GameHandle::new(events_tx);
    let manager = GameManager::new(physics, config.movement, config.physics_debug, seed);
    let mut loop_task = tokio::spawn(manager.run(events_rx));

    // Create application state and router
    let state = AppState::new(config.clone(), game.clone());
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(game))
        .await?;

    // The loop has already been told to stop; don't hang on a wedged task
    if tokio::time::timeout(std::time::Duration::from_secs(5), &mut loop_task)
        .await
        .is_err()
    {
        warn!("Simulation loop did not exit in time, aborting");
        loop_task.abort();
    }

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

/// Wait for a termination signal, then stop the simulation loop
async fn shutdown_signal(game: GameHandle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
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

    if let Err(e) = game.shutdown().await {
        warn!(error = %e, "Simulation loop already stopped");
    }
}
