//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use zipline_api::AppState;
use zipline_core::config::{AppConfig, NotificationConfig};
use zipline_core::traits::{StorageProvider, UploadNotifier};
use zipline_database::{MemoryStore, Repositories};
use zipline_entity::file::{IncompleteFile, IncompleteFileStatus};
use zipline_entity::user::User;
use zipline_service::{
    AssemblyDispatcher, MetadataRegistrar, PartialUploadService, PasswordHasher, SessionTracker,
    WebhookNotifier,
};
use zipline_storage::{ChunkStore, LocalStorageProvider};
use zipline_worker::{AssemblyHandler, AssemblyPool};

/// Token of the user every `TestApp` starts with.
pub const TOKEN: &str = "test-token";

/// Test application context
pub struct TestApp {
    /// The Axum router for making test requests
    pub router: Router,
    /// Repository backing store
    pub store: Arc<MemoryStore>,
    /// Underlying local content store
    pub local: LocalStorageProvider,
    /// Fragment store
    pub chunks: ChunkStore,
    /// Assembly pool
    pub pool: Arc<AssemblyPool>,
    /// Upload sessions
    pub tracker: Arc<SessionTracker>,
    /// Application config
    pub config: AppConfig,
    /// The token owner
    pub user: User,
    _dirs: (TempDir, TempDir),
}

/// One chunk request.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub start: u64,
    pub end: u64,
    pub total: u64,
    pub identifier: Option<String>,
    pub last: bool,
    pub filename: String,
    pub body: Bytes,
    pub extra: Vec<(&'static str, String)>,
    pub token: Option<String>,
}

impl ChunkRequest {
    /// Chunk `start..end` of `data`.
    pub fn slice(data: &[u8], start: usize, end: usize, identifier: Option<&str>) -> Self {
        Self {
            start: start as u64,
            end: end as u64,
            total: data.len() as u64,
            identifier: identifier.map(str::to_string),
            last: end == data.len(),
            filename: "video.bin".to_string(),
            body: Bytes::copy_from_slice(&data[start..end]),
            extra: Vec::new(),
            token: Some(TOKEN.to_string()),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.extra.push((name, value.into()));
        self
    }

    fn into_request(self) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header("host", "files.test")
            .header("content-range", format!("bytes {}-{}/{}", self.start, self.end, self.total))
            .header("x-zipline-p-filename", self.filename)
            .header("x-zipline-p-content-type", "application/octet-stream")
            .header("x-zipline-p-lastchunk", self.last.to_string())
            .header("x-zipline-p-content-length", self.total.to_string());
        if let Some(id) = self.identifier {
            builder = builder.header("x-zipline-p-identifier", id);
        }
        if let Some(token) = self.token {
            builder = builder.header("authorization", token);
        }
        for (name, value) in self.extra {
            builder = builder.header(name, value);
        }
        builder.body(Body::from(self.body)).unwrap()
    }
}

/// Deterministic test content.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Chunk boundaries for `sizes`.
pub fn boundaries(sizes: &[usize]) -> Vec<(usize, usize)> {
    let mut offset = 0;
    sizes
        .iter()
        .map(|size| {
            let range = (offset, offset + size);
            offset += size;
            range
        })
        .collect()
}

impl TestApp {
    /// Create a new test application with default configuration
    pub async fn new() -> Self {
        Self::build(|_| {}, |local| Arc::new(local)).await
    }

    /// Create a test application with adjusted configuration
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        Self::build(adjust, |local| Arc::new(local)).await
    }

    /// Create a test application whose content store wraps the local one
    pub async fn build(
        adjust: impl FnOnce(&mut AppConfig),
        wrap: impl FnOnce(LocalStorageProvider) -> Arc<dyn StorageProvider>,
    ) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();

        let mut config = AppConfig::default();
        config.core.temp_directory = temp.path().to_string_lossy().into_owned();
        config.storage.local.root_path = root.path().to_string_lossy().into_owned();
        adjust(&mut config);

        let store = Arc::new(MemoryStore::new());
        let user = store.add_user("alice", TOKEN).await;
        let repos = Repositories::memory(store.clone());

        let local = LocalStorageProvider::new(&config.storage.local.root_path)
            .await
            .unwrap();
        let storage = wrap(local.clone());
        let chunks = ChunkStore::new(&config.core.temp_directory).await.unwrap();

        let notifier: Arc<dyn UploadNotifier> =
            Arc::new(WebhookNotifier::new(&NotificationConfig::default()).unwrap());
        let handler = Arc::new(AssemblyHandler::new(
            repos.clone(),
            Arc::clone(&storage),
            chunks.clone(),
            notifier,
        ));
        let pool = AssemblyPool::start(handler, &config.worker);

        let tracker = Arc::new(SessionTracker::new(config.files.max_file_size_bytes));
        let registrar = MetadataRegistrar::new(
            repos.clone(),
            Arc::clone(&storage),
            PasswordHasher::new(),
            config.files.clone(),
        );
        let uploads = Arc::new(PartialUploadService::new(
            &config,
            Arc::clone(&tracker),
            chunks.clone(),
            registrar,
            Arc::clone(&pool) as Arc<dyn AssemblyDispatcher>,
        ));

        let state = AppState {
            config: Arc::new(config.clone()),
            repos,
            storage,
            uploads,
            password_hasher: Arc::new(PasswordHasher::new()),
            started_at: Instant::now(),
        };

        Self {
            router: zipline_api::build_app(state),
            store,
            local,
            chunks,
            pool,
            tracker,
            config,
            user,
            _dirs: (temp, root),
        }
    }

    /// Send a request through the router
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body)
    }

    /// POST one chunk, returning the status and JSON body
    pub async fn upload_chunk(&self, chunk: ChunkRequest) -> (StatusCode, Value) {
        let (status, _, body) = self.send(chunk.into_request()).await;
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    /// Upload `data` in chunks of `sizes`, returning the last response
    pub async fn upload(&self, data: &[u8], sizes: &[usize]) -> (StatusCode, Value) {
        self.upload_with(data, sizes, |c| c).await
    }

    /// Like [`TestApp::upload`], with every chunk passed through `customize`
    pub async fn upload_with(
        &self,
        data: &[u8],
        sizes: &[usize],
        customize: impl Fn(ChunkRequest) -> ChunkRequest,
    ) -> (StatusCode, Value) {
        let mut identifier: Option<String> = None;
        let mut last = (StatusCode::OK, Value::Null);
        for (start, end) in boundaries(sizes) {
            let chunk = customize(ChunkRequest::slice(data, start, end, identifier.as_deref()));
            last = self.upload_chunk(chunk).await;
            if last.0 != StatusCode::OK {
                return last;
            }
            if let Some(id) = last.1["partialIdentifier"].as_str() {
                identifier = Some(id.to_string());
            }
        }
        last
    }

    /// GET `uri` with optional extra headers
    pub async fn get(&self, uri: &str, headers: &[(&str, &str)]) -> (StatusCode, HeaderMap, Bytes) {
        let mut builder = Request::builder().method("GET").uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Poll until the assembly of `file_id` reaches a terminal status
    pub async fn wait_for_assembly(&self, file_id: Uuid) -> IncompleteFile {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let done = self
                .store
                .incomplete_files()
                .await
                .into_iter()
                .find(|f| f.metadata.file_id == file_id && f.status.is_terminal());
            if let Some(done) = done {
                return done;
            }
            assert!(Instant::now() < deadline, "assembly of {file_id} did not finish");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Id of the file in a last-chunk response
    pub fn file_id(response: &Value) -> Uuid {
        response["files"][0]["id"].as_str().unwrap().parse().unwrap()
    }

    /// Whether every assembly finished as `status`
    pub async fn all_incomplete_are(&self, status: IncompleteFileStatus) -> bool {
        self.store
            .incomplete_files()
            .await
            .iter()
            .all(|f| f.status == status)
    }
}
