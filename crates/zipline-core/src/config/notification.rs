//! Upload notification configuration.

use serde::{Deserialize, Serialize};

/// Where upload-completed notifications are delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// HTTP endpoint receiving a JSON POST per completed upload.
    /// When unset, completions are only logged.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Request timeout for webhook delivery.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    10
}
