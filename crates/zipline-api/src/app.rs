//! Application builder: wires router, middleware and state into an Axum app.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware as axum_middleware;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::logging::request_logging;
use crate::router::build_router;
use crate::state::AppState;

/// Headroom over one chunk for the body limit.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

/// Builds the complete Axum application with all routes and middleware.
///
/// Request bodies are capped at `chunks.max_bytes` plus a little headroom.
pub fn build_app(state: AppState) -> Router {
    let limit = usize::try_from(state.config.chunks.max_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(BODY_LIMIT_SLACK);

    build_router(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(limit))
        .layer(axum_middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
}
