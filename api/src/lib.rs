//! Logsift API Server
//!
//! This crate provides the HTTP server for Logsift, a multi-tenant log search
//! service. Tenants authenticate with bearer tokens, submit log records, and
//! run search-language queries that are compiled to tenant-scoped SQL.
//!
//! # Architecture
//!
//! The API server is built on Axum and Tokio, providing:
//! - `POST /api/v1/query` for search queries, with per-tenant rate and
//!   concurrency limits and a shared result cache
//! - `POST /api/v1/logs` for asynchronous log ingestion
//! - `GET /health` and `GET /metrics` for operations
//!
//! # Example
//!
//! ```no_run
//! use api::run_server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     run_server().await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod auth;
mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod routes;
mod state;

pub use config::{Config, LogFormat, QueryBackend};
pub use state::AppState;

use anyhow::Result;
use axum::http::{header, HeaderValue};
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

const HSTS: &str = "max-age=63072000; includeSubDomains";
const CSP: &str = "default-src 'self'; script-src 'self' 'unsafe-inline'; connect-src 'self';";

/// Runs the Logsift API server.
///
/// This function initializes the server with configuration from environment variables
/// and starts listening for incoming connections. It handles graceful shutdown on
/// SIGTERM/SIGINT signals.
///
/// # Errors
///
/// Returns an error if:
/// - Configuration cannot be loaded from environment
/// - A configured backend cannot be reached
/// - The server fails to bind to the configured address
/// - A fatal error occurs during operation
pub async fn run_server() -> Result<()> {
    let config = Config::from_env()?;
    run_server_with_config(config).await
}

/// Runs the Logsift API server with the provided configuration.
///
/// Pending ingestion batches and cache fills are drained after the listener
/// stops.
///
/// # Errors
///
/// Returns an error if:
/// - The application state cannot be built
/// - The server fails to bind to the configured address
/// - A fatal error occurs during operation
pub async fn run_server_with_config(config: Config) -> Result<()> {
    let addr = config.socket_addr()?;

    tracing::info!(
        host = %config.host,
        port = %config.port,
        backend = ?config.backend,
        rate_limit = config.rate_limit,
        max_concurrent = config.max_concurrent,
        "Logsift API server starting"
    );

    let state = AppState::from_config(&config).await?;
    let app = create_router(state.clone());
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(%addr, "Listening for connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    state.shutdown().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Creates the main application router with all routes and middleware.
///
/// This function is public to allow testing the router without starting a full server.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::query_routes(state.clone()))
        .merge(routes::logs_routes(state.clone()))
        .merge(routes::metrics_routes(state.clone()))
        .merge(routes::health_routes(state))
        .layer(SetResponseHeaderLayer::overriding(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static(HSTS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CSP),
        ))
        .layer(TraceLayer::new_for_http())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
