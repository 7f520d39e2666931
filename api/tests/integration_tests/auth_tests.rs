//! Integration tests for authentication, authorization and rate limiting.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::json;
use shared::admission::AdmissionConfig;
use shared::executor::StaticExecutor;
use shared::pipeline::PipelineConfig;

use super::common::{
    post_json, query, send, test_app, test_app_with, ADMIN_TOKEN, OPERATOR_TOKEN, ROWS,
    VIEWER_TOKEN,
};

fn limited(rate_limit: u32) -> super::common::TestApp {
    test_app_with(
        StaticExecutor::new(ROWS),
        AdmissionConfig {
            rate_limit,
            ..AdmissionConfig::default()
        },
        PipelineConfig::default(),
    )
}

#[tokio::test]
async fn test_missing_authorization_header() {
    let app = test_app();

    let response = post_json(
        &app.router,
        "/api/v1/query",
        None,
        &json!({"query": "search"}),
    )
    .await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["error"], "unauthorized");
    assert_eq!(app.executor.call_count(), 0);
}

#[tokio::test]
async fn test_malformed_authorization_header() {
    let app = test_app();

    let response = send(
        &app.router,
        Request::builder()
            .method("POST")
            .uri("/api/v1/query")
            .header(header::AUTHORIZATION, format!("Token {ADMIN_TOKEN}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"query":"search"}"#))
            .unwrap(),
    )
    .await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_token_is_forbidden() {
    let app = test_app();

    let response = query(&app.router, "sk_revoked", "search").await;

    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.body["message"], "Invalid service token");
}

#[tokio::test]
async fn test_role_without_permission_is_forbidden() {
    let app = test_app();

    let response = post_json(
        &app.router,
        "/api/v1/logs",
        Some(VIEWER_TOKEN),
        &json!({"level": "INFO", "service": "api", "message": "hello"}),
    )
    .await;

    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(
        response.body["message"],
        "Role 'viewer' missing permission 'ingest'"
    );
}

#[tokio::test]
async fn test_every_role_may_query() {
    let app = test_app();

    for token in [ADMIN_TOKEN, VIEWER_TOKEN, OPERATOR_TOKEN] {
        let response = query(&app.router, token, "search level=ERROR").await;
        assert_eq!(response.status, StatusCode::OK, "token {token}");
    }
}

#[tokio::test]
async fn test_rate_limit_returns_429_with_retry_after() {
    let app = limited(3);

    for _ in 0..3 {
        let response = query(&app.router, ADMIN_TOKEN, "search level=ERROR").await;
        assert_eq!(response.status, StatusCode::OK);
    }

    let response = query(&app.router, ADMIN_TOKEN, "search level=ERROR").await;
    assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.body["error"], "rate_limited");
    assert_eq!(response.headers[header::RETRY_AFTER], "1");
}

#[tokio::test]
async fn test_rate_limit_is_per_tenant() {
    let app = limited(1);

    assert_eq!(
        query(&app.router, ADMIN_TOKEN, "search").await.status,
        StatusCode::OK
    );
    assert_eq!(
        query(&app.router, ADMIN_TOKEN, "search").await.status,
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
        query(&app.router, VIEWER_TOKEN, "search").await.status,
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_rate_limit_covers_ingestion() {
    let app = limited(1);
    let record = json!({"level": "INFO", "service": "api", "message": "hello"});

    let first = post_json(&app.router, "/api/v1/logs", Some(ADMIN_TOKEN), &record).await;
    let second = post_json(&app.router, "/api/v1/logs", Some(ADMIN_TOKEN), &record).await;

    assert_eq!(first.status, StatusCode::ACCEPTED);
    assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_rejected_requests_do_not_consume_rate_budget() {
    let app = limited(1);

    let response = query(&app.router, "sk_revoked", "search").await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    let response = query(&app.router, ADMIN_TOKEN, "search").await;
    assert_eq!(response.status, StatusCode::OK);
}
