//! In-memory upload session tracking.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use dashmap::mapref::entry::Entry;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::debug;

use zipline_core::error::AppError;
use zipline_entity::upload::UploadOptions;

/// Length of generated session identifiers.
pub const IDENTIFIER_LENGTH: usize = 8;

/// Errors raised by [`SessionTracker::accept`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No live session has this identifier.
    #[error("No upload session found for identifier {identifier}")]
    SessionNotFound {
        /// Identifier the client sent.
        identifier: String,
    },
    /// Accepting the chunk would push the upload over the size limit.
    #[error("Upload {identifier} exceeds the maximum file size of {limit} bytes")]
    SizeExceeded {
        /// Identifier of the removed session.
        identifier: String,
        /// Configured limit.
        limit: u64,
    },
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::SessionNotFound { .. } => AppError::not_found(err.to_string()),
            SessionError::SizeExceeded { .. } => AppError::payload_too_large(err.to_string()),
        }
    }
}

/// State of one in-flight chunked upload.
#[derive(Debug, Clone)]
pub struct UploadSession {
    /// Random identifier shared with the client.
    pub identifier: String,
    /// Sum of accepted chunk lengths, each distinct range counted once.
    pub bytes_received: u64,
    /// Options frozen at chunk 0.
    pub options: Arc<UploadOptions>,
    /// Declared total size.
    pub total_size: u64,
    /// Distinct `(start, end)` ranges accepted so far.
    pub ranges: BTreeSet<(u64, u64)>,
    /// Last accepted chunk (or creation).
    pub last_activity: DateTime<Utc>,
}

impl UploadSession {
    /// Number of distinct chunks accepted.
    pub fn chunks_accepted(&self) -> u32 {
        u32::try_from(self.ranges.len()).unwrap_or(u32::MAX)
    }
}

/// Tracks upload sessions across requests.
///
/// Sessions live in a sharded map so unrelated uploads never contend on a
/// single lock.
#[derive(Debug)]
pub struct SessionTracker {
    sessions: DashMap<String, UploadSession>,
    /// Identifiers whose last chunk arrived but whose assembly is not
    /// scheduled yet.
    finishing: DashSet<String>,
    max_file_size: u64,
}

impl SessionTracker {
    /// Create a tracker enforcing `max_file_size` bytes per upload.
    pub fn new(max_file_size: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            finishing: DashSet::new(),
            max_file_size,
        }
    }

    /// Maximum accepted bytes per upload.
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Open a session and return its fresh identifier.
    pub fn begin(&self, total_size: u64, options: Arc<UploadOptions>) -> String {
        loop {
            let identifier = random_identifier();
            if self.finishing.contains(&identifier) {
                continue;
            }
            if let Entry::Vacant(slot) = self.sessions.entry(identifier.clone()) {
                slot.insert(UploadSession {
                    identifier: identifier.clone(),
                    bytes_received: 0,
                    options,
                    total_size,
                    ranges: BTreeSet::new(),
                    last_activity: Utc::now(),
                });
                debug!(identifier = %identifier, total_size, "Opened upload session");
                return identifier;
            }
        }
    }

    /// Account for the chunk covering `[start, end)`.
    ///
    /// A range that was already accepted is a client retry: its fragment is
    /// overwritten on disk, so it only refreshes the session. On
    /// [`SessionError::SizeExceeded`] the session is removed.
    pub fn accept(
        &self,
        identifier: &str,
        start: u64,
        end: u64,
    ) -> Result<Arc<UploadOptions>, SessionError> {
        {
            let mut session = self.sessions.get_mut(identifier).ok_or_else(|| {
                SessionError::SessionNotFound {
                    identifier: identifier.to_string(),
                }
            })?;
            if session.ranges.contains(&(start, end)) {
                debug!(identifier, start, end, "Chunk re-sent");
                session.last_activity = Utc::now();
                return Ok(Arc::clone(&session.options));
            }
            let next = session
                .bytes_received
                .saturating_add(end.saturating_sub(start));
            if next <= self.max_file_size {
                session.bytes_received = next;
                session.ranges.insert((start, end));
                session.last_activity = Utc::now();
                return Ok(Arc::clone(&session.options));
            }
        }

        self.sessions.remove(identifier);
        debug!(identifier, limit = self.max_file_size, "Upload session exceeded size limit");
        Err(SessionError::SizeExceeded {
            identifier: identifier.to_string(),
            limit: self.max_file_size,
        })
    }

    /// Snapshot of a session.
    pub fn get(&self, identifier: &str) -> Option<UploadSession> {
        self.sessions.get(identifier).map(|s| s.clone())
    }

    /// Remove a session, returning its final state.
    pub fn end(&self, identifier: &str) -> Option<UploadSession> {
        self.sessions.remove(identifier).map(|(_, session)| session)
    }

    /// Close a session whose last chunk arrived.
    ///
    /// The identifier stays in [`SessionTracker::identifiers`] until
    /// [`SessionTracker::release`], so its fragments are never swept while the
    /// upload is being registered and handed to the assembly pool.
    pub fn finish(&self, identifier: &str) -> Option<UploadSession> {
        self.finishing.insert(identifier.to_string());
        let session = self.end(identifier);
        if session.is_none() {
            self.finishing.remove(identifier);
        }
        session
    }

    /// Forget a finished identifier.
    pub fn release(&self, identifier: &str) {
        self.finishing.remove(identifier);
    }

    /// Identifiers idle for longer than `ttl`.
    pub fn expired(&self, ttl: Duration) -> Vec<String> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        self.expired_ids(ttl, Utc::now())
    }

    /// Remove every session idle for longer than `ttl`, returning them.
    pub fn evict_expired(&self, ttl: Duration) -> Vec<UploadSession> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        self.expired_ids(ttl, now)
            .into_iter()
            .filter_map(|id| {
                // Re-check under the shard lock; a chunk may have landed since.
                self.sessions
                    .remove_if(&id, |_, s| now.signed_duration_since(s.last_activity) > ttl)
                    .map(|(_, s)| s)
            })
            .collect()
    }

    fn expired_ids(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|s| now.signed_duration_since(s.last_activity) > ttl)
            .map(|s| s.key().clone())
            .collect()
    }

    /// Identifiers whose fragments are still needed: live sessions and
    /// finishing uploads.
    pub fn identifiers(&self) -> HashSet<String> {
        self.sessions
            .iter()
            .map(|s| s.key().clone())
            .chain(self.finishing.iter().map(|id| id.key().clone()))
            .collect()
    }

    /// Whether `identifier` is live.
    pub fn contains(&self, identifier: &str) -> bool {
        self.sessions.contains_key(identifier)
    }

    /// Number of open sessions. Finishing uploads are not counted.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is open.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every session.
    pub fn clear(&self) {
        self.sessions.clear();
        self.finishing.clear();
    }
}

fn random_identifier() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(IDENTIFIER_LENGTH)
        .map(char::from)
        .collect()
}
