//! Log ingestion endpoint.
//!
//! `POST /api/v1/logs` accepts one record or a batch, stamps every record with
//! the caller's tenant and hands the batch to the background ingestion queue.

use crate::audit::{AuditEvent, AuditStatus};
use crate::auth::{authorize, Permission, TenantContext};
use crate::error::{ApiError, ValidationErrorDetail};
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::routing::post;
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use shared::models::{LogBatch, LogRecord, LogValidationError};
use tower_http::limit::RequestBodyLimitLayer;

/// Maximum accepted request body, in bytes.
pub const MAX_INGEST_BODY_BYTES: usize = 1024 * 1024;

/// Response for accepted log records.
#[derive(Debug, Serialize, Deserialize)]
pub struct LogIngestResponse {
    /// Always `queued`; records are written asynchronously.
    pub status: String,
    /// Number of records accepted.
    pub accepted: usize,
}

/// Creates the log ingestion routes.
pub fn logs_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/logs", post(ingest_logs))
        .route_layer(from_fn_with_state(
            state.auth(Permission::Ingest),
            authorize,
        ))
        .layer(RequestBodyLimitLayer::new(MAX_INGEST_BODY_BYTES))
        .with_state(state)
}

/// Handler for log ingestion.
///
/// Returns 202 Accepted once the batch is queued, 400 if any record is
/// invalid (nothing is queued in that case), and 503 if the queue is full.
async fn ingest_logs(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    payload: Result<Json<LogBatch>, JsonRejection>,
) -> Result<(StatusCode, Json<LogIngestResponse>), ApiError> {
    let Json(batch) = payload?;

    let records = batch.into_records();
    if records.is_empty() {
        return Err(ApiError::EmptyBatch);
    }

    let details: Vec<ValidationErrorDetail> = records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            record.validate_record().err().map(|e| ValidationErrorDetail {
                index,
                field: match &e {
                    LogValidationError::EmptyField(field) => (*field).to_string(),
                    LogValidationError::TimestampOutOfRange => "timestamp".to_string(),
                    LogValidationError::ValidationError(_) => "unknown".to_string(),
                },
                message: e.to_string(),
            })
        })
        .collect();
    if !details.is_empty() {
        tracing::debug!(
            tenant_id = %tenant.tenant_id,
            rejected = details.len(),
            "Rejected log batch"
        );
        return Err(ApiError::Validation(details));
    }

    let count = records.len();
    let stamped: Vec<LogRecord> = records
        .into_iter()
        .map(|record| record.stamp(&tenant.tenant_id))
        .collect();

    if let Err(e) = state.ingest().try_enqueue(stamped) {
        state.metrics().record_ingestion_errors(count);
        AuditEvent::new(&tenant, "LOGS_INGEST", "logs", e.to_string(), AuditStatus::Failure)
            .emit();
        return Err(ApiError::IngestUnavailable);
    }

    state.metrics().record_ingested(count);
    AuditEvent::new(
        &tenant,
        "LOGS_INGEST",
        "logs",
        format!("{count} record(s)"),
        AuditStatus::Success,
    )
    .emit();
    tracing::debug!(tenant_id = %tenant.tenant_id, count, "Queued log records");

    Ok((
        StatusCode::ACCEPTED,
        Json(LogIngestResponse {
            status: "queued".to_string(),
            accepted: count,
        }),
    ))
}
