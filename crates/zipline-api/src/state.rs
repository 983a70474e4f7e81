//! Application state shared across all handlers and middleware.

use std::sync::Arc;
use std::time::Instant;

use zipline_core::config::AppConfig;
use zipline_core::traits::StorageProvider;
use zipline_database::Repositories;
use zipline_service::{PartialUploadService, PasswordHasher};

/// Application state containing all shared dependencies.
///
/// Passed to every Axum handler via `State<AppState>`.
/// All fields are `Arc`-wrapped for cheap cloning across tasks.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// Repositories for files, folders, users and assembly progress
    pub repos: Repositories,
    /// Content store
    pub storage: Arc<dyn StorageProvider>,
    /// Chunked upload orchestration
    pub uploads: Arc<PartialUploadService>,
    /// Password hasher (Argon2) for protected files
    pub password_hasher: Arc<PasswordHasher>,
    /// Process start, for uptime reporting
    pub started_at: Instant,
}
