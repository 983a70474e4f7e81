//! Response DTOs.

use serde::{Deserialize, Serialize};

/// Count response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountResponse {
    /// Count value.
    pub count: u64,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"ok"` or `"degraded"`.
    pub status: String,
    /// Version.
    pub version: String,
    /// Uptime.
    pub uptime_seconds: u64,
    /// Content store backend.
    pub storage: String,
    /// Whether the content store answered its health check.
    pub storage_healthy: bool,
    /// Open upload sessions.
    pub upload_sessions: usize,
}
