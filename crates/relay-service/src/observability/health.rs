//! Health endpoints for the relay service.
//!
//! Provides Kubernetes-compatible health endpoints:
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (can we serve traffic?)
//! - `GET /stats` - Point-in-time gateway counters as JSON
//!
//! Note: The `/metrics` endpoint is served separately via
//! `metrics-exporter-prometheus`.
//!
//! # Health State
//!
//! The `HealthState` tracks:
//! - `live`: Always true after startup (process is running)
//! - `ready`: True once the gateway actor and listeners are up; flipped off
//!   at the start of graceful shutdown so load balancers drain us

use crate::actors::{GatewayHandle, GatewayStats};

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health state for the relay service.
///
/// Tracks liveness and readiness for Kubernetes probes.
#[derive(Debug)]
pub struct HealthState {
    /// Whether the service is live (process running).
    /// Always true after startup initialization.
    live: AtomicBool,
    /// Whether the service is ready to serve traffic.
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    /// Mark the service as ready to serve traffic.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Check if the service is live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Shared state for the health router.
#[derive(Clone)]
pub struct HealthContext {
    pub state: Arc<HealthState>,
    pub gateway: GatewayHandle,
}

/// Create the health router with liveness, readiness, and stats endpoints.
///
/// # Endpoints
///
/// - `GET /health` - Returns 200 if process is running (liveness)
/// - `GET /ready` - Returns 200 if ready to serve traffic, 503 otherwise
/// - `GET /stats` - Returns gateway counters as JSON, 503 if unavailable
pub fn health_router(state: Arc<HealthState>, gateway: GatewayHandle) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .route("/stats", get(stats_handler))
        .with_state(HealthContext { state, gateway })
}

/// Liveness probe handler.
///
/// Returns 200 OK if the process is running.
async fn liveness_handler(State(ctx): State<HealthContext>) -> StatusCode {
    if ctx.state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Readiness probe handler.
///
/// Returns 200 OK if the service is ready to serve traffic, 503 otherwise.
async fn readiness_handler(State(ctx): State<HealthContext>) -> StatusCode {
    if ctx.state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Gateway counters for dashboards and smoke tests.
async fn stats_handler(
    State(ctx): State<HealthContext>,
) -> Result<Json<GatewayStats>, StatusCode> {
    match ctx.gateway.stats().await {
        Ok(stats) => Ok(Json(stats)),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}
