//! Route configuration

use axum::{
    routing::{get, post},
    Router,
};
use mediaflow_infra::{request_id_middleware, security_headers_middleware};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub const API_PREFIX: &str = "/api/v1";

/// Create requests are small JSON documents; the media itself goes straight
/// to storage.
const MAX_BODY_BYTES: usize = 64 * 1024;
const MAX_CONCURRENT_REQUESTS: usize = 1024;

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/uploads", post(handlers::uploads::create_upload))
        .route(
            "/uploads/{processing_id}",
            get(handlers::uploads::get_upload_status),
        );

    Router::new()
        .route("/health", get(handlers::health::health))
        .nest(API_PREFIX, api)
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .layer(axum::middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
}
