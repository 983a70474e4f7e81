//! # zipline-api
//!
//! HTTP API layer for Zipline built on Axum.
//!
//! Provides the upload, incomplete-file, raw serving and health endpoints,
//! the token extractor, request logging and error mapping.

pub mod app;
pub mod dto;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use app::build_app;
pub use error::ApiError;
pub use state::AppState;
