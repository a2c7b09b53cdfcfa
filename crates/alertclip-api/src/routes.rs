//! API routes.

use axum::http::header;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::deps::check_deps;
use crate::handlers::health::{health, ready};
use crate::handlers::jobs::{
    cancel_job, cleanup_job, job_result, job_status, probe_job, stream_media,
};
use crate::handlers::process::start_process;
use crate::handlers::sources::{acquire_source, upload_source, validate_source};
use crate::metrics::metrics_middleware;
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let api_routes = Router::new()
        // Source intake
        .route("/validate", post(validate_source))
        .route("/acquire", post(acquire_source))
        .route("/upload", post(upload_source))
        // Acquired source inspection
        .route("/probe/:job_id", get(probe_job))
        .route("/media/:job_id", get(stream_media))
        // Processing lifecycle
        .route("/process/:job_id", post(start_process))
        .route("/status/:job_id", get(job_status))
        .route("/result/:job_id", get(job_result))
        .route("/cancel/:job_id", post(cancel_job))
        .route("/cleanup/:job_id", post(cleanup_job))
        // Environment
        .route("/check-deps", get(check_deps));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers([header::CONTENT_TYPE]);
    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let parsed: Vec<axum::http::HeaderValue> =
            origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}
