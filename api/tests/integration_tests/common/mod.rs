//! Common test utilities and helpers for integration tests.
//!
//! This module provides shared functionality used across all integration tests,
//! including test app setup and HTTP request helpers.

use api::auth::AccessPolicy;
use api::{create_router, AppState};
use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use shared::admission::AdmissionConfig;
use shared::executor::StaticExecutor;
use shared::pipeline::PipelineConfig;
use shared::storage::InMemoryLogSink;
use std::sync::Arc;

/// Admin token for `tenant-a`.
pub const ADMIN_TOKEN: &str = "sk_live_12345";
/// Viewer token for `tenant-b`.
pub const VIEWER_TOKEN: &str = "sk_test_67890";
/// Operator token for `tenant-c`.
pub const OPERATOR_TOKEN: &str = "sk_ops_24680";

/// Rows returned by the default executor.
pub const ROWS: &str = r#"[{"service":"auth","count":7}]"#;

/// Everything a test needs to drive and inspect the server.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub executor: Arc<StaticExecutor>,
    pub sink: Arc<InMemoryLogSink>,
}

/// A response with its headers and parsed JSON body.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

fn policy() -> AccessPolicy {
    AccessPolicy::default()
        .with_token(ADMIN_TOKEN, "tenant-a", "admin")
        .with_token(VIEWER_TOKEN, "tenant-b", "viewer")
        .with_token(OPERATOR_TOKEN, "tenant-c", "operator")
}

/// Creates a test app with default limits.
pub fn test_app() -> TestApp {
    test_app_with(
        StaticExecutor::new(ROWS),
        AdmissionConfig::default(),
        PipelineConfig::default(),
    )
}

/// Creates a test app with a custom executor and limits.
pub fn test_app_with(
    executor: StaticExecutor,
    admission: AdmissionConfig,
    pipeline: PipelineConfig,
) -> TestApp {
    let executor = Arc::new(executor);
    let sink = InMemoryLogSink::new_shared();
    let state = AppState::with_limits(
        policy(),
        executor.clone(),
        sink.clone(),
        admission,
        pipeline,
    )
    .unwrap();

    TestApp {
        router: create_router(state.clone()),
        state,
        executor,
        sink,
    }
}

/// Sends a request and collects the response.
pub async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = tower::ServiceExt::oneshot(app.clone(), request)
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

    TestResponse {
        status,
        headers,
        body,
    }
}

/// Helper to make a POST request with JSON body and an optional bearer token.
pub async fn post_json(app: &Router, uri: &str, token: Option<&str>, body: &Value) -> TestResponse {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    send(
        app,
        builder
            .body(Body::from(serde_json::to_string(body).unwrap()))
            .unwrap(),
    )
    .await
}

/// Runs a query as the holder of `token`.
pub async fn query(app: &Router, token: &str, text: &str) -> TestResponse {
    post_json(
        app,
        "/api/v1/query",
        Some(token),
        &serde_json::json!({ "query": text }),
    )
    .await
}

/// Helper to make a GET request.
pub async fn get(app: &Router, uri: &str) -> TestResponse {
    send(
        app,
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}
