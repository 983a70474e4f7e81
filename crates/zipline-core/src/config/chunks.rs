//! Chunked upload configuration.

use serde::{Deserialize, Serialize};

/// Chunked (partial) upload settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunksConfig {
    /// Whether chunked uploads are accepted at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Clients chunk files larger than this; also the largest chunk body
    /// accepted (default 95 MiB).
    #[serde(default = "default_max")]
    pub max_bytes: u64,
    /// Size of each chunk, also used as the S3 multipart part size (default 25 MiB).
    #[serde(default = "default_size")]
    pub size_bytes: u64,
    /// Idle time after which an unfinished upload session is reaped.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
    /// Cron expression (with seconds) for the session/fragment reaper.
    #[serde(default = "default_reaper_cron")]
    pub reaper_cron: String,
}

impl Default for ChunksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bytes: default_max(),
            size_bytes: default_size(),
            session_ttl_seconds: default_session_ttl(),
            reaper_cron: default_reaper_cron(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max() -> u64 {
    99_614_720 // 95 MiB
}

fn default_size() -> u64 {
    26_214_400 // 25 MiB
}

fn default_session_ttl() -> u64 {
    3600
}

fn default_reaper_cron() -> String {
    "0 */5 * * * *".to_string()
}
