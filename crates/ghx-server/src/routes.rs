//! Route configuration for the HTTP/SSE surface.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{
    command_presence, get_job, get_metrics, get_multi_host, health_check, list_jobs,
    reload_catalog, stop_job, stream_events, submit_job, submit_multi_host, test_connection,
};
use crate::state::AppState;

/// Build the full HTTP/SSE router over `state`.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .route("/jobs", get(list_jobs).post(submit_job))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/stop", post(stop_job))
        .route("/probes/test-connection", post(test_connection))
        .route("/probes/command-presence", post(command_presence))
        .route("/nccl/multi-host", post(submit_multi_host))
        .route("/nccl/multi-host/{id}", get(get_multi_host))
        .route("/catalog/reload", post(reload_catalog))
        .route("/events", get(stream_events));

    Router::new()
        .nest("/api", api_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new().allow_origin(parsed).allow_methods(Any).allow_headers(Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use ghx_config::GhxConfig;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState::new(GhxConfig::new())
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = create_router(test_state());
        let request = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn job_list_starts_empty() {
        let app = create_router(test_state());
        let request = Request::builder().uri("/api/jobs").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let jobs: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let app = create_router(test_state());
        let request = Request::builder().uri("/api/jobs/does-not-exist").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let app = create_router(test_state());
        let request = Request::builder().uri("/api/unknown").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
