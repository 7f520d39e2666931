//! Search query endpoint.
//!
//! `POST /api/v1/query` runs a search-language query for the caller's tenant.

use crate::audit::{AuditEvent, AuditStatus};
use crate::auth::{authorize, Permission, TenantContext};
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use shared::pipeline::{CacheStatus, QueryRequest};
use std::time::Instant;

/// Response header carrying `HIT` or `MISS`.
pub const CACHE_HEADER: HeaderName = HeaderName::from_static("x-cache");

/// Request body for a query.
#[derive(Debug, Deserialize)]
pub struct QueryBody {
    /// Query text, e.g. `search level=ERROR | stats count by service`.
    pub query: String,
}

/// Successful query response.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Whether the results came from the cache.
    pub cache: CacheStatus,
    /// Cache fingerprint of the query.
    pub fingerprint: String,
    /// Result rows.
    pub results: serde_json::Value,
}

/// Creates the query routes.
pub fn query_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/query", post(run_query))
        .route_layer(from_fn_with_state(state.auth(Permission::Query), authorize))
        .with_state(state)
}

async fn run_query(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    payload: Result<Json<QueryBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;

    let started = Instant::now();
    let request = QueryRequest::new(&tenant.tenant_id, body.query);
    let result = state.pipeline().execute(&request).await;

    let outcome = match &result {
        Ok(_) => "success",
        Err(e) => e.outcome(),
    };
    state.metrics().record_query(outcome, started.elapsed());

    let status = if result.is_ok() {
        AuditStatus::Success
    } else {
        AuditStatus::Failure
    };
    AuditEvent::new(&tenant, "QUERY_EXECUTE", "logs", &request.query, status).emit();

    let outcome = result?;
    tracing::debug!(
        tenant_id = %tenant.tenant_id,
        cache = %outcome.cache,
        elapsed_ms = started.elapsed().as_millis(),
        "Query served"
    );

    let results = serde_json::from_str(&outcome.payload)
        .map_err(|e| ApiError::Internal(format!("Malformed result payload: {e}")))?;

    Ok((
        [(
            CACHE_HEADER,
            HeaderValue::from_static(outcome.cache.header_value()),
        )],
        Json(QueryResponse {
            cache: outcome.cache,
            fingerprint: outcome.fingerprint,
            results,
        }),
    )
        .into_response())
}
