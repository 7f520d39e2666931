//! Prometheus scrape endpoint.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

/// Content type of the Prometheus text exposition format.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Creates the metrics routes.
pub fn metrics_routes(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .with_state(state)
}

async fn scrape(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state
        .metrics()
        .encode()
        .map_err(|e| ApiError::Internal(format!("Failed to encode metrics: {e}")))?;
    Ok(([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AccessPolicy;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use shared::executor::StaticExecutor;
    use shared::storage::InMemoryLogSink;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_scrape_exposes_counters() {
        let state = AppState::with_in_memory_store(
            AccessPolicy::default(),
            Arc::new(StaticExecutor::default()),
            InMemoryLogSink::new_shared(),
        )
        .unwrap();
        state.metrics().record_ingested(4);
        state.metrics().record_query("success", Duration::from_millis(3));

        let response = metrics_routes(state)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("logsift_logs_ingested_total 4"));
        assert!(text.contains(r#"logsift_queries_total{outcome="success"} 1"#));
    }
}
