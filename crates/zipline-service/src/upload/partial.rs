//! Chunked upload orchestration.

use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use zipline_core::config::{AppConfig, ChunksConfig, CoreConfig, FilesConfig};
use zipline_core::error::AppError;
use zipline_core::result::AppResult;
use zipline_entity::job::AssemblyJob;
use zipline_entity::user::User;
use zipline_storage::ChunkStore;

use super::headers::{self, HeaderError, names};
use super::registrar::{MetadataRegistrar, UploadedFileEntry};
use super::session::{SessionError, SessionTracker};

/// Hands finished uploads to the assembly worker pool.
pub trait AssemblyDispatcher: Send + Sync + 'static {
    /// Whether new jobs are accepted at all.
    fn is_accepting(&self) -> bool;

    /// Enqueue a job. Fails with `ServiceUnavailable` when the queue is full
    /// or the pool is shutting down.
    fn schedule(&self, job: AssemblyJob) -> AppResult<()>;
}

/// Failure of one upload request.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// A malformed or missing header.
    #[error(transparent)]
    Header(#[from] HeaderError),
    /// Any other failure.
    #[error(transparent)]
    App(#[from] AppError),
}

impl From<SessionError> for UploadError {
    fn from(err: SessionError) -> Self {
        Self::App(err.into())
    }
}

/// Body of a successful chunk response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialUploadResponse {
    /// Always `true` for accepted chunks.
    pub partial_success: bool,
    /// Session identifier, sent only in the response to the first chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_identifier: Option<String>,
    /// Pending files, filled on the last chunk.
    pub files: Vec<UploadedFileEntry>,
}

/// Drives one chunk through session tracking, fragment storage and, on the
/// last chunk, registration and assembly scheduling.
pub struct PartialUploadService {
    tracker: Arc<SessionTracker>,
    chunk_store: ChunkStore,
    registrar: MetadataRegistrar,
    dispatcher: Arc<dyn AssemblyDispatcher>,
    files: FilesConfig,
    chunks: ChunksConfig,
    core: CoreConfig,
}

impl std::fmt::Debug for PartialUploadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialUploadService")
            .field("sessions", &self.tracker.len())
            .field("temp_directory", &self.chunk_store.dir())
            .finish_non_exhaustive()
    }
}

impl PartialUploadService {
    /// Create the service.
    pub fn new(
        config: &AppConfig,
        tracker: Arc<SessionTracker>,
        chunk_store: ChunkStore,
        registrar: MetadataRegistrar,
        dispatcher: Arc<dyn AssemblyDispatcher>,
    ) -> Self {
        Self {
            tracker,
            chunk_store,
            registrar,
            dispatcher,
            files: config.files.clone(),
            chunks: config.chunks.clone(),
            core: config.core.clone(),
        }
    }

    /// The session tracker.
    pub fn tracker(&self) -> &Arc<SessionTracker> {
        &self.tracker
    }

    /// `scheme://host` used for returned URLs.
    fn domain(&self, override_domain: Option<&str>, host: Option<&str>) -> String {
        let host = override_domain
            .or(self.core.default_domain.as_deref())
            .or(host)
            .unwrap_or("localhost")
            .trim_end_matches('/');
        if host.contains("://") {
            host.to_string()
        } else {
            format!("{}://{host}", self.core.scheme())
        }
    }

    /// Drop a session and its fragments after a hard failure.
    async fn abandon(&self, identifier: &str) {
        self.tracker.end(identifier);
        self.chunk_store.delete_fragments(identifier).await;
    }

    /// Handle one chunk request.
    ///
    /// `host` is the request's `Host` header, used when neither the request
    /// nor the configuration names a domain.
    pub async fn handle_chunk(
        &self,
        uploader: Option<&User>,
        headers: &HeaderMap,
        host: Option<&str>,
        body: Bytes,
    ) -> Result<PartialUploadResponse, UploadError> {
        if !self.chunks.enabled {
            return Err(AppError::validation("Chunked uploads are disabled").into());
        }

        let chunk = headers::parse_partial(headers)?.ok_or_else(|| {
            HeaderError::new(names::CONTENT_RANGE, "Missing content-range")
        })?;

        if body.len() as u64 != chunk.len() {
            return Err(AppError::validation(format!(
                "Chunk body is {} bytes but content-range covers {} bytes",
                body.len(),
                chunk.len()
            ))
            .into());
        }
        if chunk.len() > self.chunks.max_bytes {
            return Err(AppError::payload_too_large(format!(
                "Chunk of {} bytes exceeds the chunk limit of {} bytes",
                chunk.len(),
                self.chunks.max_bytes
            ))
            .into());
        }

        let identifier = match &chunk.identifier {
            None => {
                // The size limit is enforced on received bytes, chunk by chunk.
                let options = headers::parse_upload_headers(headers, &self.files)?;
                self.registrar.check_policy(uploader, &chunk, &options).await?;
                self.tracker.begin(chunk.total, Arc::new(options))
            }
            Some(identifier) => identifier.clone(),
        };

        if let Err(e) = self.tracker.accept(&identifier, chunk.start, chunk.end) {
            if matches!(e, SessionError::SizeExceeded { .. }) {
                let removed = self.chunk_store.delete_fragments(&identifier).await;
                warn!(identifier = %identifier, removed, "Upload exceeded size limit, discarded");
            }
            return Err(e.into());
        }

        if let Err(e) = self
            .chunk_store
            .write(&identifier, chunk.start, chunk.end, body)
            .await
        {
            warn!(identifier = %identifier, error = %e, "Failed to write chunk fragment");
            self.abandon(&identifier).await;
            return Err(e.into());
        }

        debug!(
            identifier = %identifier,
            start = chunk.start,
            end = chunk.end,
            total = chunk.total,
            last = chunk.last_chunk,
            "Accepted chunk"
        );

        let partial_identifier = chunk.is_first().then(|| identifier.clone());
        if !chunk.last_chunk {
            return Ok(PartialUploadResponse {
                partial_success: true,
                partial_identifier,
                files: Vec::new(),
            });
        }

        let entry = self.finish(uploader, &identifier, &chunk, host).await?;
        Ok(PartialUploadResponse {
            partial_success: true,
            partial_identifier,
            files: vec![entry],
        })
    }

    /// Register the pending file and schedule its assembly.
    async fn finish(
        &self,
        uploader: Option<&User>,
        identifier: &str,
        chunk: &headers::PartialChunk,
        host: Option<&str>,
    ) -> Result<UploadedFileEntry, UploadError> {
        let Some(session) = self.tracker.finish(identifier) else {
            self.chunk_store.delete_fragments(identifier).await;
            return Err(SessionError::SessionNotFound {
                identifier: identifier.to_string(),
            }
            .into());
        };
        // Fragments stay visible to the reaper until the pool tracks them.
        let _finishing = FinishingGuard {
            tracker: &self.tracker,
            identifier,
        };

        if !self.dispatcher.is_accepting() {
            self.chunk_store.delete_fragments(identifier).await;
            return Err(AppError::service_unavailable("Server is shutting down").into());
        }

        let domain = self.domain(session.options.override_domain.as_deref(), host);
        let registration = match self
            .registrar
            .create_pending_file(uploader, chunk, &session.options, &domain)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                self.chunk_store.delete_fragments(identifier).await;
                return Err(e.into());
            }
        };

        let file = &registration.file;
        let job = AssemblyJob {
            identifier: identifier.to_string(),
            user_id: file.user_id,
            file_id: file.id,
            file_name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            options: Arc::clone(&session.options),
            total_size: session.total_size,
            expected_chunks: session.chunks_accepted(),
            domain,
            response_url: registration.entry.url.clone(),
        };

        if let Err(e) = self.dispatcher.schedule(job) {
            warn!(identifier, file_id = %file.id, error = %e, "Failed to schedule assembly");
            if let Err(rollback) = self.registrar.discard(file).await {
                warn!(file_id = %file.id, error = %rollback, "Failed to discard pending file");
            }
            self.chunk_store.delete_fragments(identifier).await;
            return Err(e.into());
        }

        info!(
            identifier,
            file_id = %file.id,
            name = %file.name,
            chunks = session.chunks_accepted(),
            size = session.total_size,
            "Scheduled assembly"
        );
        Ok(registration.entry)
    }
}

/// Releases a finishing identifier when the finish path returns.
struct FinishingGuard<'a> {
    tracker: &'a SessionTracker,
    identifier: &'a str,
}

impl Drop for FinishingGuard<'_> {
    fn drop(&mut self) {
        self.tracker.release(self.identifier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};
    use std::sync::atomic::{AtomicBool, Ordering};

    use http::HeaderValue;
    use zipline_database::{MemoryStore, Repositories};
    use zipline_storage::LocalStorageProvider;

    use crate::password::PasswordHasher;

    #[derive(Default)]
    struct RecordingDispatcher {
        jobs: Mutex<Vec<AssemblyJob>>,
        full: AtomicBool,
        tracker: OnceLock<Arc<SessionTracker>>,
        live_at_schedule: Mutex<Vec<bool>>,
    }

    impl AssemblyDispatcher for RecordingDispatcher {
        fn is_accepting(&self) -> bool {
            true
        }

        fn schedule(&self, job: AssemblyJob) -> AppResult<()> {
            if let Some(tracker) = self.tracker.get() {
                let live = tracker.identifiers().contains(&job.identifier);
                self.live_at_schedule.lock().unwrap().push(live);
            }
            if self.full.load(Ordering::SeqCst) {
                return Err(AppError::service_unavailable("Assembly queue is full"));
            }
            self.jobs.lock().unwrap().push(job);
            Ok(())
        }
    }

    struct Fixture {
        _dirs: (tempfile::TempDir, tempfile::TempDir),
        store: Arc<MemoryStore>,
        chunks: ChunkStore,
        dispatcher: Arc<RecordingDispatcher>,
        service: PartialUploadService,
        user: User,
    }

    async fn fixture(config: AppConfig) -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let storage = LocalStorageProvider::new(root.path().to_str().unwrap())
            .await
            .unwrap();
        let store = Arc::new(MemoryStore::new());
        let user = store.add_user("alice", "token-a").await;
        let chunks = ChunkStore::new(temp.path()).await.unwrap();
        let registrar = MetadataRegistrar::new(
            Repositories::memory(store.clone()),
            Arc::new(storage),
            PasswordHasher::new(),
            config.files.clone(),
        );
        let tracker = Arc::new(SessionTracker::new(config.files.max_file_size_bytes));
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let _ = dispatcher.tracker.set(Arc::clone(&tracker));
        let service = PartialUploadService::new(
            &config,
            tracker,
            chunks.clone(),
            registrar,
            dispatcher.clone(),
        );
        Fixture {
            _dirs: (temp, root),
            store,
            chunks,
            dispatcher,
            service,
            user,
        }
    }

    fn chunk_headers(start: u64, end: u64, total: u64, id: Option<&str>, last: bool) -> HeaderMap {
        let mut map = HeaderMap::new();
        let set = |map: &mut HeaderMap, name: &'static str, value: String| {
            map.insert(name, HeaderValue::from_str(&value).unwrap());
        };
        set(&mut map, names::CONTENT_RANGE, format!("bytes {start}-{end}/{total}"));
        set(&mut map, names::PARTIAL_FILENAME, "data.bin".to_string());
        set(&mut map, names::PARTIAL_CONTENT_TYPE, "application/octet-stream".to_string());
        set(&mut map, names::PARTIAL_LASTCHUNK, last.to_string());
        set(&mut map, names::PARTIAL_CONTENT_LENGTH, total.to_string());
        if let Some(id) = id {
            set(&mut map, names::PARTIAL_IDENTIFIER, id.to_string());
        }
        map
    }

    #[tokio::test]
    async fn test_three_chunks_schedule_one_job() {
        let fx = fixture(AppConfig::default()).await;
        let user = Some(&fx.user);

        let first = fx
            .service
            .handle_chunk(user, &chunk_headers(0, 10, 30, None, false), Some("files.test"), Bytes::from(vec![b'a'; 10]))
            .await
            .unwrap();
        let id = first.partial_identifier.clone().unwrap();
        assert!(first.files.is_empty());

        let middle = fx
            .service
            .handle_chunk(user, &chunk_headers(10, 20, 30, Some(&id), false), None, Bytes::from(vec![b'b'; 10]))
            .await
            .unwrap();
        assert_eq!(middle.partial_identifier, None);

        let last = fx
            .service
            .handle_chunk(user, &chunk_headers(20, 30, 30, Some(&id), true), Some("files.test"), Bytes::from(vec![b'c'; 10]))
            .await
            .unwrap();
        assert_eq!(last.files.len(), 1);
        assert!(last.files[0].pending);
        assert!(last.files[0].url.starts_with("http://files.test/u/"));

        let jobs = fx.dispatcher.jobs.lock().unwrap().clone();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].identifier, id);
        assert_eq!(jobs[0].total_size, 30);
        assert_eq!(jobs[0].expected_chunks, 3);
        assert_eq!(fx.chunks.list_fragments(&id).await.unwrap().len(), 3);
        assert!(fx.service.tracker().is_empty());
        assert!(fx.store.files().await[0].is_pending());
    }

    #[tokio::test]
    async fn test_resent_chunk_keeps_expected_count() {
        let fx = fixture(AppConfig::default()).await;
        async fn send(
            fx: &Fixture,
            start: u64,
            id: Option<&str>,
            last: bool,
        ) -> PartialUploadResponse {
            let headers = chunk_headers(start, start + 10, 30, id, last);
            let body = Bytes::from(vec![b'a' + (start / 10) as u8; 10]);
            fx.service
                .handle_chunk(Some(&fx.user), &headers, None, body)
                .await
                .unwrap()
        }

        let id = send(&fx, 0, None, false).await.partial_identifier.unwrap();
        send(&fx, 10, Some(&id), false).await;
        // Client retries after a lost response.
        send(&fx, 10, Some(&id), false).await;
        let last = send(&fx, 20, Some(&id), true).await;
        assert_eq!(last.files.len(), 1);

        let jobs = fx.dispatcher.jobs.lock().unwrap().clone();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].expected_chunks, 3);
        let fragments = fx.chunks.list_fragments(&id).await.unwrap();
        assert_eq!(
            zipline_storage::chunked::verify_coverage(&fragments, 30, jobs[0].expected_chunks as usize),
            Ok(())
        );
    }

    #[tokio::test]
    async fn test_identifier_stays_live_until_scheduled() {
        let fx = fixture(AppConfig::default()).await;

        let done = fx
            .service
            .handle_chunk(Some(&fx.user), &chunk_headers(0, 4, 4, None, true), None, Bytes::from("abcd"))
            .await
            .unwrap();
        assert_eq!(done.files.len(), 1);

        let id = fx.dispatcher.jobs.lock().unwrap()[0].identifier.clone();
        assert_eq!(*fx.dispatcher.live_at_schedule.lock().unwrap(), vec![true]);
        assert!(!fx.service.tracker().identifiers().contains(&id));
        assert_eq!(fx.chunks.list_fragments(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_size_exceeded_discards_fragments() {
        let mut config = AppConfig::default();
        config.files.max_file_size_bytes = 25;
        let fx = fixture(config).await;
        let user = Some(&fx.user);

        let first = fx
            .service
            .handle_chunk(user, &chunk_headers(0, 10, 30, None, false), None, Bytes::from(vec![0; 10]))
            .await
            .unwrap();
        let id = first.partial_identifier.unwrap();
        fx.service
            .handle_chunk(user, &chunk_headers(10, 20, 30, Some(&id), false), None, Bytes::from(vec![0; 10]))
            .await
            .unwrap();

        let err = fx
            .service
            .handle_chunk(user, &chunk_headers(20, 30, 30, Some(&id), false), None, Bytes::from(vec![0; 10]))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::App(ref e) if e.kind == zipline_core::error::ErrorKind::PayloadTooLarge));
        assert!(fx.chunks.list_fragments(&id).await.unwrap().is_empty());
        assert!(!fx.service.tracker().contains(&id));
        assert!(fx.store.files().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_identifier_and_bad_headers() {
        let fx = fixture(AppConfig::default()).await;
        let user = Some(&fx.user);

        let err = fx
            .service
            .handle_chunk(user, &chunk_headers(10, 20, 30, Some("nope1234"), false), None, Bytes::from(vec![0; 10]))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::App(ref e) if e.is_not_found()));

        let err = fx
            .service
            .handle_chunk(user, &HeaderMap::new(), None, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Header(ref h) if h.header == names::CONTENT_RANGE));

        let err = fx
            .service
            .handle_chunk(user, &chunk_headers(0, 10, 30, None, false), None, Bytes::from(vec![0; 3]))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::App(ref e) if e.kind == zipline_core::error::ErrorKind::Validation));
        assert!(fx.service.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_rolls_back_registration() {
        let fx = fixture(AppConfig::default()).await;
        fx.dispatcher.full.store(true, Ordering::SeqCst);

        let err = fx
            .service
            .handle_chunk(Some(&fx.user), &chunk_headers(0, 4, 4, None, true), None, Bytes::from("abcd"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::App(ref e) if e.kind == zipline_core::error::ErrorKind::ServiceUnavailable));
        assert!(fx.store.files().await.is_empty());
        assert!(fx.chunks.list_identifiers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_anonymous_upload_rejected_on_first_chunk() {
        let fx = fixture(AppConfig::default()).await;
        let err = fx
            .service
            .handle_chunk(None, &chunk_headers(0, 4, 8, None, false), None, Bytes::from("abcd"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::App(ref e) if e.kind == zipline_core::error::ErrorKind::Authentication));
        assert!(fx.service.tracker().is_empty());
        assert!(fx.chunks.list_identifiers().await.unwrap().is_empty());
    }
}
