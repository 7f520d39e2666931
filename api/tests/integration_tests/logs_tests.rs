//! Integration tests for log ingestion.
//!
//! Tests cover:
//! - Single and batch ingestion
//! - Tenant stamping
//! - Validation errors and malformed bodies

use axum::http::StatusCode;
use serde_json::json;

use super::common::{post_json, test_app, ADMIN_TOKEN, OPERATOR_TOKEN};

#[tokio::test]
async fn test_ingest_single_log() {
    let app = test_app();

    let log = json!({
        "timestamp": "2026-03-01T12:00:00Z",
        "level": "ERROR",
        "message": "Database connection failed",
        "service": "db-service",
        "attributes": {
            "error_code": "CONN_TIMEOUT",
            "retry_count": 3
        }
    });

    let response = post_json(&app.router, "/api/v1/logs", Some(ADMIN_TOKEN), &log).await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert_eq!(response.body["status"], "queued");
    assert_eq!(response.body["accepted"], 1);

    app.state.ingest().flush().await;
    let stored = app.sink.records_for("tenant-a").unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].service, "db-service");
    assert_eq!(stored[0].attributes["retry_count"], 3);
    assert_eq!(stored[0].timestamp.to_rfc3339(), "2026-03-01T12:00:00+00:00");
}

#[tokio::test]
async fn test_ingest_batch_is_stamped_per_tenant() {
    let app = test_app();

    let logs = json!([
        {"level": "INFO", "message": "Server started", "service": "api"},
        {"level": "WARN", "message": "High memory usage", "service": "api"},
        {"level": "ERROR", "message": "Request failed", "service": "api"}
    ]);

    let response = post_json(&app.router, "/api/v1/logs", Some(OPERATOR_TOKEN), &logs).await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert_eq!(response.body["accepted"], 3);

    app.state.ingest().flush().await;
    assert_eq!(app.sink.records_for("tenant-c").unwrap().len(), 3);
    assert!(app.sink.records_for("tenant-a").unwrap().is_empty());

    let metrics = app.state.metrics().encode().unwrap();
    assert!(metrics.contains("logsift_logs_ingested_total 3"));
}

#[tokio::test]
async fn test_missing_timestamp_defaults_to_now() {
    let app = test_app();
    let before = chrono::Utc::now();

    let response = post_json(
        &app.router,
        "/api/v1/logs",
        Some(ADMIN_TOKEN),
        &json!({"level": "INFO", "message": "tick", "service": "cron"}),
    )
    .await;
    assert_eq!(response.status, StatusCode::ACCEPTED);

    app.state.ingest().flush().await;
    let stored = app.sink.records_for("tenant-a").unwrap();
    assert!(stored[0].timestamp >= before);
}

#[tokio::test]
async fn test_batch_with_invalid_record_is_rejected_whole() {
    let app = test_app();

    let logs = json!([
        {"level": "INFO", "message": "fine", "service": "api"},
        {"level": "INFO", "message": "   ", "service": "api"},
        {"level": "", "message": "no level", "service": "api"}
    ]);

    let response = post_json(&app.router, "/api/v1/logs", Some(ADMIN_TOKEN), &logs).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "validation_failed");

    let details = response.body["details"].as_array().unwrap();
    assert_eq!(details.len(), 2);
    assert_eq!(details[0]["index"], 1);
    assert_eq!(details[0]["field"], "message");
    assert_eq!(details[1]["index"], 2);
    assert_eq!(details[1]["field"], "level");

    app.state.ingest().flush().await;
    assert_eq!(app.sink.count().unwrap(), 0);
}

#[tokio::test]
async fn test_missing_required_field_is_invalid_json() {
    let app = test_app();

    let response = post_json(
        &app.router,
        "/api/v1/logs",
        Some(ADMIN_TOKEN),
        &json!({"level": "INFO", "service": "api"}),
    )
    .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "invalid_json");
}

#[tokio::test]
async fn test_empty_batch() {
    let app = test_app();

    let response = post_json(&app.router, "/api/v1/logs", Some(ADMIN_TOKEN), &json!([])).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "empty_batch");
}
