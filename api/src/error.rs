//! HTTP error responses.
//!
//! Every failure leaving a handler or middleware is an [`ApiError`], rendered
//! as `{ "error": <code>, "message": <text> }` with an appropriate status.

use axum::extract::rejection::JsonRejection;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use shared::admission::{AdmissionError, Gate};
use shared::pipeline::PipelineError;
use shared::query::ParseError;

/// Error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable description.
    pub message: String,
    /// Per-record validation failures (ingestion only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

/// Validation error detail for a specific log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    /// Index in the batch (0 for single requests).
    pub index: usize,
    /// Field that failed validation.
    pub field: String,
    /// Error message.
    pub message: String,
}

/// Errors returned by the API.
#[derive(Debug)]
pub enum ApiError {
    /// No usable credentials.
    Unauthorized(String),
    /// Credentials are valid but not allowed here.
    Forbidden(String),
    /// The request body is not valid JSON for this endpoint.
    InvalidJson(String),
    /// The request body exceeded the size limit.
    PayloadTooLarge,
    /// An ingestion batch contained no records.
    EmptyBatch,
    /// One or more records failed validation.
    Validation(Vec<ValidationErrorDetail>),
    /// The tenant was not admitted.
    Admission(AdmissionError),
    /// The query failed.
    Pipeline(PipelineError),
    /// The ingestion queue is full.
    IngestUnavailable,
    /// Unexpected server-side failure.
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge
        } else {
            Self::InvalidJson(rejection.body_text())
        }
    }
}

impl From<AdmissionError> for ApiError {
    fn from(e: AdmissionError) -> Self {
        Self::Admission(e)
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Admission(e) => Self::Admission(e),
            other => Self::Pipeline(other),
        }
    }
}

impl ApiError {
    /// HTTP status and error code for this error.
    #[must_use]
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Self::InvalidJson(_) => (StatusCode::BAD_REQUEST, "invalid_json"),
            Self::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
            Self::EmptyBatch => (StatusCode::BAD_REQUEST, "empty_batch"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
            Self::Admission(e) => match e.gate() {
                Gate::Rate => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
                Gate::Concurrency => (StatusCode::TOO_MANY_REQUESTS, "concurrency_limited"),
            },
            Self::Pipeline(e) => match e {
                PipelineError::Parse(ParseError::Guardrail(_)) => {
                    (StatusCode::BAD_REQUEST, "guardrail_violation")
                }
                PipelineError::Parse(_) => (StatusCode::BAD_REQUEST, "parse_error"),
                PipelineError::Admission(e) => match e.gate() {
                    Gate::Rate => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
                    Gate::Concurrency => (StatusCode::TOO_MANY_REQUESTS, "concurrency_limited"),
                },
                PipelineError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                PipelineError::Executor(_) => (StatusCode::BAD_GATEWAY, "executor_error"),
            },
            Self::IngestUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "ingest_unavailable"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Unauthorized(m) | Self::Forbidden(m) | Self::InvalidJson(m) | Self::Internal(m) => {
                m.clone()
            }
            Self::PayloadTooLarge => "Request body is too large".to_string(),
            Self::EmptyBatch => "At least one log record is required".to_string(),
            Self::Validation(details) => {
                format!("{} log record(s) failed validation", details.len())
            }
            Self::Admission(e) => e.to_string(),
            // Executor details stay in the server log.
            Self::Pipeline(PipelineError::Executor(_)) => "Query execution failed".to_string(),
            Self::Pipeline(e) => e.to_string(),
            Self::IngestUnavailable => "Ingestion queue is full, retry later".to_string(),
        }
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Admission(e) if e.gate() == Gate::Rate)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = code, "Request failed");
        }

        let body = ErrorBody {
            error: code.to_string(),
            message: self.message(),
            details: match &self {
                Self::Validation(details) => Some(details.clone()),
                _ => None,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if self.is_rate_limited() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}
