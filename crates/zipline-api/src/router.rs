//! Route definitions for the Zipline HTTP API.
//!
//! API routes are mounted under `/api`; raw content is served from `/raw`.
//! The router receives `AppState` and passes it to all handlers via Axum's `State` extractor.

use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers;
use crate::state::AppState;

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .merge(upload_routes())
        .merge(incomplete_routes())
        .merge(health_routes());

    Router::new()
        .nest("/api", api_routes)
        .route("/raw/{name}", get(handlers::raw::raw))
        .with_state(state)
}

/// Chunked upload endpoint
fn upload_routes() -> Router<AppState> {
    Router::new().route("/upload", post(handlers::upload::upload))
}

/// Assembly progress polling and cleanup
fn incomplete_routes() -> Router<AppState> {
    Router::new().route(
        "/user/files/incomplete",
        get(handlers::incomplete::list_incomplete).delete(handlers::incomplete::delete_incomplete),
    )
}

/// Health check
fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health::health))
}
