//! Health check endpoint.
//!
//! Liveness probe for load balancers. It does not touch the shared store or
//! the database, but reports background queue counters so a stuck ingestion
//! worker is visible.

use crate::state::AppState;
use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use shared::tasks::QueueStats;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status (always "healthy" if reachable).
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Service version.
    pub version: &'static str,
    /// Background queue counters.
    pub queues: QueueHealth,
}

/// Counters for the server's background queues.
#[derive(Debug, Serialize)]
pub struct QueueHealth {
    /// Log ingestion queue.
    pub ingest: QueueStats,
    /// Result cache fill queue.
    pub cache_writes: QueueStats,
}

/// Creates the health check routes.
pub fn health_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "logsift-api",
        version: env!("CARGO_PKG_VERSION"),
        queues: QueueHealth {
            ingest: state.ingest().stats(),
            cache_writes: state.pipeline().cache_write_stats(),
        },
    })
}
