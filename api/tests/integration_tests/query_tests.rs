//! Integration tests for the query endpoint.
//!
//! Tests cover:
//! - Cache misses followed by hits
//! - Tenant isolation in compiled SQL and in the cache
//! - Guardrails, parse errors, timeouts and concurrency limits

use axum::http::StatusCode;
use shared::admission::AdmissionConfig;
use shared::executor::StaticExecutor;
use shared::pipeline::PipelineConfig;
use shared::query::SqlArg;
use std::time::Duration;

use super::common::{query, test_app, test_app_with, ADMIN_TOKEN, ROWS, VIEWER_TOKEN};

const WINDOW: &str = "earliest=2026-03-01T00:00:00Z latest=2026-03-01T06:00:00Z";

fn scenario() -> String {
    format!("search level=ERROR service=auth {WINDOW} | stats count by service | sort -count | head 50")
}

#[tokio::test]
async fn test_miss_then_hit() {
    let app = test_app();

    let first = query(&app.router, ADMIN_TOKEN, &scenario()).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.headers["x-cache"], "MISS");
    assert_eq!(first.body["cache"], "miss");
    assert_eq!(first.body["results"][0]["count"], 7);

    app.state.pipeline().flush_cache_writes().await;

    let second = query(&app.router, ADMIN_TOKEN, &scenario()).await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.headers["x-cache"], "HIT");
    assert_eq!(second.body["results"], first.body["results"]);
    assert_eq!(second.body["fingerprint"], first.body["fingerprint"]);

    assert_eq!(app.executor.call_count(), 1);
}

#[tokio::test]
async fn test_compiled_sql_is_scoped_to_tenant() {
    let app = test_app();

    let response = query(&app.router, VIEWER_TOKEN, &scenario()).await;
    assert_eq!(response.status, StatusCode::OK);

    let calls = app.executor.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].sql.contains("org_id = ?"));
    assert_eq!(calls[0].args[0], SqlArg::from("tenant-b"));
    assert!(!calls[0].sql.contains("ERROR"), "values must be bound");
}

#[tokio::test]
async fn test_cache_is_not_shared_between_tenants() {
    let app = test_app();

    let a = query(&app.router, ADMIN_TOKEN, &scenario()).await;
    app.state.pipeline().flush_cache_writes().await;
    let b = query(&app.router, VIEWER_TOKEN, &scenario()).await;

    assert_eq!(b.headers["x-cache"], "MISS");
    assert_ne!(a.body["fingerprint"], b.body["fingerprint"]);
    assert_eq!(app.executor.call_count(), 2);
}

#[tokio::test]
async fn test_injection_attempt_stays_a_bound_value() {
    let app = test_app();

    let response = query(
        &app.router,
        ADMIN_TOKEN,
        &format!("search service=x'OR'1'='1 {WINDOW}"),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);

    let calls = app.executor.calls();
    assert!(!calls[0].sql.contains("OR'1'"));
    assert!(calls[0].args.contains(&SqlArg::from("x'OR'1'='1")));
}

#[tokio::test]
async fn test_time_range_guardrail() {
    let app = test_app();

    let response = query(&app.router, ADMIN_TOKEN, "search earliest=-60d level=ERROR").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "guardrail_violation");
    assert_eq!(app.executor.call_count(), 0);
}

#[tokio::test]
async fn test_unknown_field_is_rejected() {
    let app = test_app();

    let response = query(&app.router, ADMIN_TOKEN, "search org_id=tenant-b").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "guardrail_violation");
}

#[tokio::test]
async fn test_sort_on_unaggregated_field_is_rejected() {
    let app = test_app();

    let response = query(
        &app.router,
        ADMIN_TOKEN,
        &format!("search {WINDOW} | stats count by user | sort -level"),
    )
    .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "guardrail_violation");
    assert_eq!(app.executor.call_count(), 0);
}

#[tokio::test]
async fn test_huge_time_offset_is_a_client_error() {
    let app = test_app();

    let response = query(&app.router, ADMIN_TOKEN, "search earliest=-100000000w").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "parse_error");
}

#[tokio::test]
async fn test_parse_error() {
    let app = test_app();

    let response = query(&app.router, ADMIN_TOKEN, "search level=ERROR | frobnicate").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "parse_error");
}

#[tokio::test]
async fn test_slow_query_times_out() {
    let app = test_app_with(
        StaticExecutor::new(ROWS).with_delay(Duration::from_millis(500)),
        AdmissionConfig {
            max_concurrent: 1,
            ..AdmissionConfig::default()
        },
        PipelineConfig {
            timeout: Duration::from_millis(50),
            ..PipelineConfig::default()
        },
    );

    let response = query(&app.router, ADMIN_TOKEN, &scenario()).await;

    assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(response.body["error"], "timeout");

    // The slot was released, so the next query is admitted.
    let response = query(&app.router, ADMIN_TOKEN, &scenario()).await;
    assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_concurrency_limit() {
    let app = test_app_with(
        StaticExecutor::new(ROWS).with_delay(Duration::from_millis(200)),
        AdmissionConfig {
            max_concurrent: 1,
            ..AdmissionConfig::default()
        },
        PipelineConfig::default(),
    );

    let slow_query = scenario();
    let slow = query(&app.router, ADMIN_TOKEN, &slow_query);
    let blocked = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        query(&app.router, ADMIN_TOKEN, "search level=WARN").await
    };
    let (slow, blocked) = tokio::join!(slow, blocked);

    assert_eq!(slow.status, StatusCode::OK);
    assert_eq!(blocked.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(blocked.body["error"], "concurrency_limited");
    assert!(!blocked.headers.contains_key("retry-after"));

    // Other tenants are unaffected, and the slot is free again.
    assert_eq!(
        query(&app.router, VIEWER_TOKEN, "search").await.status,
        StatusCode::OK
    );
    assert_eq!(
        query(&app.router, ADMIN_TOKEN, "search").await.status,
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_executor_failure_is_bad_gateway() {
    let app = test_app_with(
        StaticExecutor::failing("Code: 60. Table logs does not exist"),
        AdmissionConfig::default(),
        PipelineConfig::default(),
    );

    let response = query(&app.router, ADMIN_TOKEN, "search").await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(response.body["error"], "executor_error");
    assert!(!response.body["message"]
        .as_str()
        .unwrap()
        .contains("Table logs"));
}
