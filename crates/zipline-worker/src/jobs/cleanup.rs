//! Reaping of abandoned upload sessions and their fragments.

use std::sync::Arc;
use std::time::Duration;

use zipline_core::result::AppResult;
use zipline_service::SessionTracker;
use zipline_storage::ChunkStore;
use zipline_storage::chunked::OrphanFragmentSweeper;

use crate::pool::ActiveUploads;

/// What one reaper pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Idle sessions evicted.
    pub sessions: usize,
    /// Fragments deleted, from evicted sessions and orphans.
    pub fragments: usize,
}

/// Evicts sessions idle past the TTL and sweeps fragments nobody owns.
#[derive(Debug, Clone)]
pub struct SessionReaper {
    tracker: Arc<SessionTracker>,
    chunk_store: ChunkStore,
    active: ActiveUploads,
    ttl: Duration,
}

impl SessionReaper {
    /// Create a reaper. `active` lists uploads whose fragments the pool still
    /// needs.
    pub fn new(
        tracker: Arc<SessionTracker>,
        chunk_store: ChunkStore,
        active: ActiveUploads,
        ttl: Duration,
    ) -> Self {
        Self {
            tracker,
            chunk_store,
            active,
            ttl,
        }
    }

    /// Run one pass.
    pub async fn reap(&self) -> AppResult<ReapReport> {
        let mut report = ReapReport::default();

        for session in self.tracker.evict_expired(self.ttl) {
            tracing::info!(
                identifier = %session.identifier,
                received = session.bytes_received,
                total = session.total_size,
                "Evicted idle upload session"
            );
            report.sessions += 1;
            report.fragments += self.chunk_store.delete_fragments(&session.identifier).await;
        }

        let mut live = self.tracker.identifiers();
        live.extend(self.active.snapshot());
        report.fragments += OrphanFragmentSweeper::new(self.chunk_store.clone())
            .sweep(&live, self.ttl)
            .await?;

        if report.sessions > 0 || report.fragments > 0 {
            tracing::info!(
                sessions = report.sessions,
                fragments = report.fragments,
                "Reaped abandoned uploads"
            );
        }
        Ok(report)
    }
}
