//! Orphan fragment cleanup.

use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use zipline_core::result::AppResult;

use super::store::ChunkStore;

/// Removes fragments that no live upload session will ever assemble.
#[derive(Debug, Clone)]
pub struct OrphanFragmentSweeper {
    store: ChunkStore,
}

impl OrphanFragmentSweeper {
    /// Create a sweeper over `store`.
    pub fn new(store: ChunkStore) -> Self {
        Self { store }
    }

    /// Delete fragments older than `max_age` whose identifier is not in
    /// `live`. Returns the number of fragments removed.
    pub async fn sweep(&self, live: &HashSet<String>, max_age: Duration) -> AppResult<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut removed = 0;
        for entry in self.store.scan().await? {
            if live.contains(&entry.fragment.identifier) || entry.modified > cutoff {
                continue;
            }
            match self.store.delete_fragment(&entry.fragment).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(
                    identifier = %entry.fragment.identifier,
                    error = %e,
                    "Failed to delete orphan fragment"
                ),
            }
        }

        if removed > 0 {
            debug!(removed, "Swept orphan chunk fragments");
        }
        Ok(removed)
    }
}
