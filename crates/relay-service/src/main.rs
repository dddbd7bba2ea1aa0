//! Relay Service
//!
//! Stateful WebSocket signaling server for presence, matchmaking, and call
//! signaling.
//!
//! # Servers
//!
//! The relay runs two HTTP servers:
//! - WebSocket server for client events (default: 0.0.0.0:8080)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Spawn the session notice drain task
//! 4. Spawn the `GatewayActor`
//! 5. Start health HTTP server (liveness, readiness, stats, metrics)
//! 6. Start WebSocket server
//! 7. Wait for shutdown signal

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use relay_service::actors::{GatewayActor, GatewayConfig, RelayMetrics};
use relay_service::config::Config;
use relay_service::events::SessionNotice;
use relay_service::observability::{health_router, HealthState};
use relay_service::ws::ws_router;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Relay Service");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    info!(
        relay_id = %config.relay_id,
        ws_bind_address = %config.ws_bind_address,
        health_bind_address = %config.health_bind_address,
        max_waiting = config.max_waiting,
        invite_expiry_seconds = config.invite_expiry_seconds,
        ring_expiry_seconds = config.ring_expiry_seconds,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder before any metrics are recorded
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus metrics recorder")?;

    // Initialize health state
    let health_state = Arc::new(HealthState::new());

    // Session notices go to a drain task; durable storage belongs to an
    // external collaborator and the relay never blocks on it.
    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel::<SessionNotice>();
    tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            match notice {
                SessionNotice::Started {
                    room_id,
                    seeker,
                    helper,
                    started_at,
                } => info!(
                    target: "relay.sessions",
                    room_id = %room_id,
                    seeker = %seeker,
                    helper = %helper,
                    started_at = %started_at,
                    "Session started"
                ),
                SessionNotice::Ended { room_id, ended_at } => info!(
                    target: "relay.sessions",
                    room_id = %room_id,
                    ended_at = %ended_at,
                    "Session ended"
                ),
            }
        }
    });

    // Spawn the gateway actor
    let metrics = RelayMetrics::new();
    let (gateway, gateway_task) = GatewayActor::spawn(
        config.relay_id.clone(),
        GatewayConfig::from(&config),
        metrics,
        notice_tx,
    );
    info!("Gateway actor spawned");

    let shutdown_token = gateway.child_token();

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config
        .health_bind_address
        .parse()
        .context("Invalid health bind address")?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state), gateway.clone()).merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("Failed to bind health server to {health_addr}"))?;
    info!(addr = %health_addr, "Health server bound successfully");

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Start WebSocket server
    let ws_addr: SocketAddr = config
        .ws_bind_address
        .parse()
        .context("Invalid WebSocket bind address")?;

    let ws_app = ws_router(gateway.clone());
    let ws_listener = tokio::net::TcpListener::bind(ws_addr)
        .await
        .with_context(|| format!("Failed to bind WebSocket server to {ws_addr}"))?;
    info!(addr = %ws_addr, "WebSocket server bound successfully");

    let ws_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        let server = axum::serve(ws_listener, ws_app).with_graceful_shutdown(async move {
            ws_shutdown_token.cancelled().await;
            info!("WebSocket server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "WebSocket server failed");
        }
    });

    health_state.set_ready();
    info!("Relay Service running - press Ctrl+C to shutdown");

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so load balancers drain us
    health_state.set_not_ready();

    // Cancelling the gateway's root token propagates to both servers and
    // every socket task
    gateway.cancel();

    // Give tasks time to shut down
    tokio::time::sleep(Duration::from_secs(2)).await;
    gateway_task.abort();

    info!("Relay Service shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
