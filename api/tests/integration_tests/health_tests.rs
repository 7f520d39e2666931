//! Integration tests for the operational endpoints.

use axum::http::{header, StatusCode};

use super::common::{get, query, test_app, ADMIN_TOKEN};

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app();

    let response = get(&app.router, "/health").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
    assert_eq!(response.body["service"], "logsift-api");
}

#[tokio::test]
async fn test_security_headers() {
    let app = test_app();

    let response = get(&app.router, "/health").await;

    assert_eq!(
        response.headers[header::STRICT_TRANSPORT_SECURITY],
        "max-age=63072000; includeSubDomains"
    );
    assert_eq!(response.headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(response.headers[header::X_FRAME_OPTIONS], "DENY");
    assert!(response
        .headers
        .contains_key(header::CONTENT_SECURITY_POLICY));
}

#[tokio::test]
async fn test_metrics_track_queries() {
    let app = test_app();

    query(&app.router, ADMIN_TOKEN, "search level=ERROR").await;
    query(&app.router, ADMIN_TOKEN, "search | bogus").await;

    let response = tower::ServiceExt::oneshot(
        app.router.clone(),
        axum::http::Request::builder()
            .uri("/metrics")
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let text = app.state.metrics().encode().unwrap();
    assert!(text.contains(r#"logsift_queries_total{outcome="success"} 1"#));
    assert!(text.contains(r#"logsift_queries_total{outcome="parse_error"} 1"#));
    assert!(text.contains("logsift_query_duration_seconds_count 2"));
}
