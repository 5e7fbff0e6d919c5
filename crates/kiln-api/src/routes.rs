//! API route definitions.

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, patch, post, put},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, jobs, leases, status};
use crate::middleware::{cors_layer, request_id};
use crate::state::AppState;

/// Create the main API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = body_limit(state.artifacts.max_artifact_bytes());
    let payload_limit = body_limit(state.leases.config().max_payload_bytes);

    Router::new()
        .nest("/api/v1", api_routes(upload_limit, payload_limit))
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .layer(axum_middleware::from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

fn body_limit(bytes: u64) -> usize {
    usize::try_from(bytes).unwrap_or(usize::MAX)
}

fn api_routes(upload_limit: usize, payload_limit: usize) -> Router<Arc<AppState>> {
    Router::new()
        .nest("/jobs", job_routes(payload_limit))
        .nest("/leases", lease_routes(upload_limit))
        .route("/status", get(status::queue_status))
}

fn job_routes(payload_limit: usize) -> Router<Arc<AppState>> {
    // Base64 inflates the payload by a third; leave room for the envelope.
    let body_limit = payload_limit.saturating_mul(2).saturating_add(64 * 1024);

    Router::new()
        .route(
            "/",
            post(jobs::submit_job).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/artifacts", get(jobs::list_artifacts))
        .route("/{id}/artifacts/{name}", get(jobs::download_artifact))
}

fn lease_routes(upload_limit: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(leases::request_job))
        .route("/{token}", patch(leases::update_job))
        .route(
            "/{token}/artifacts/{name}",
            put(leases::upload_artifact).layer(DefaultBodyLimit::max(upload_limit)),
        )
}
