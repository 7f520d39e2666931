//! API route definitions.
//!
//! This module organizes all HTTP routes for the Logsift API server.

mod health;
mod logs;
mod metrics;
mod query;

pub use health::health_routes;
pub use logs::{logs_routes, LogIngestResponse, MAX_INGEST_BODY_BYTES};
pub use metrics::metrics_routes;
pub use query::{query_routes, QueryBody, QueryResponse, CACHE_HEADER};
