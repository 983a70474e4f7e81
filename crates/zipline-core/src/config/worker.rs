//! Assembly worker pool configuration.

use serde::{Deserialize, Serialize};

/// Background assembly pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of assembly jobs that may run at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Number of scheduled jobs that may wait for a free slot.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Seconds to wait for in-flight jobs on shutdown.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
            drain_timeout_seconds: default_drain_timeout(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

fn default_drain_timeout() -> u64 {
    30
}
