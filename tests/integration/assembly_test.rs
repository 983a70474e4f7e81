//! Assembly failure paths and session reaping, driven through HTTP.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;

use zipline_core::error::AppError;
use zipline_core::result::AppResult;
use zipline_core::traits::{AssemblySink, ByteStream, StorageProvider};
use zipline_entity::file::IncompleteFileStatus;
use zipline_storage::LocalStorageProvider;
use zipline_worker::SessionReaper;

use helpers::{ChunkRequest, TestApp, pattern};

/// Content store whose assemblies never commit.
#[derive(Debug)]
struct UncommittableStore {
    inner: LocalStorageProvider,
}

struct UncommittableSink {
    inner: Box<dyn AssemblySink>,
}

#[async_trait]
impl AssemblySink for UncommittableSink {
    async fn write_at(&mut self, offset: u64, data: Bytes) -> AppResult<()> {
        self.inner.write_at(offset, data).await
    }

    async fn commit(self: Box<Self>) -> AppResult<u64> {
        self.inner.abort().await?;
        Err(AppError::storage("object store rejected the upload"))
    }

    async fn abort(self: Box<Self>) -> AppResult<()> {
        self.inner.abort().await
    }
}

#[async_trait]
impl StorageProvider for UncommittableStore {
    fn provider_type(&self) -> &str {
        "uncommittable"
    }
    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> AppResult<()> {
        self.inner.put(key, data, content_type).await
    }
    async fn get(&self, key: &str) -> AppResult<ByteStream> {
        self.inner.get(key).await
    }
    async fn range(&self, key: &str, start: u64, end: u64) -> AppResult<Bytes> {
        self.inner.range(key, start, end).await
    }
    async fn size(&self, key: &str) -> AppResult<u64> {
        self.inner.size(key).await
    }
    async fn delete(&self, key: &str) -> AppResult<()> {
        self.inner.delete(key).await
    }
    async fn begin_assembly(
        &self,
        key: &str,
        content_type: &str,
    ) -> AppResult<Box<dyn AssemblySink>> {
        Ok(Box::new(UncommittableSink {
            inner: self.inner.begin_assembly(key, content_type).await?,
        }))
    }
}

#[tokio::test]
async fn test_missing_fragment_fails_assembly() {
    let app = TestApp::new().await;
    let data = pattern(30_000, 11);

    let (status, first) = app
        .upload_chunk(ChunkRequest::slice(&data, 0, 10_000, None))
        .await;
    assert_eq!(status, StatusCode::OK);
    let id = first["partialIdentifier"].as_str().unwrap().to_string();

    let (status, _) = app
        .upload_chunk(ChunkRequest::slice(&data, 10_000, 20_000, Some(&id)))
        .await;
    assert_eq!(status, StatusCode::OK);

    // Lose the middle fragment before the last chunk arrives.
    let fragments = app.chunks.list_fragments(&id).await.unwrap();
    let middle = fragments.iter().find(|f| f.start == 10_000).unwrap();
    app.chunks.delete_fragment(middle).await.unwrap();

    let (status, last) = app
        .upload_chunk(ChunkRequest::slice(&data, 20_000, 30_000, Some(&id)))
        .await;
    assert_eq!(status, StatusCode::OK);

    let file_id = TestApp::file_id(&last);
    let progress = app.wait_for_assembly(file_id).await;
    assert_eq!(progress.status, IncompleteFileStatus::Failed);
    assert_eq!(progress.chunks_complete, 0);

    let file = app.store.files().await.into_iter().find(|f| f.id == file_id).unwrap();
    assert!(file.is_pending());
    assert!(app.local.size(&file.name).await.unwrap_err().is_not_found());
    assert!(app.chunks.list_identifiers().await.unwrap().is_empty());

    let (status, _, _) = app.get(&format!("/raw/{}", file.name), &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_commit_failure_leaves_no_object() {
    let app = TestApp::build(|_| {}, |local| {
        Arc::new(UncommittableStore { inner: local }) as Arc<dyn StorageProvider>
    })
    .await;
    let data = pattern(9_000, 2);

    let (status, body) = app.upload(&data, &[3_000, 3_000, 3_000]).await;
    assert_eq!(status, StatusCode::OK);

    let file_id = TestApp::file_id(&body);
    let progress = app.wait_for_assembly(file_id).await;
    assert_eq!(progress.status, IncompleteFileStatus::Failed);

    let file = app.store.files().await.into_iter().find(|f| f.id == file_id).unwrap();
    assert!(file.is_pending());
    assert!(app.local.size(&file.name).await.unwrap_err().is_not_found());
    assert!(app.chunks.list_identifiers().await.unwrap().is_empty());
    assert!(app.all_incomplete_are(IncompleteFileStatus::Failed).await);
}

#[tokio::test]
async fn test_reaped_session_rejects_later_chunks() {
    let app = TestApp::new().await;
    let data = pattern(20_000, 6);

    let (status, first) = app
        .upload_chunk(ChunkRequest::slice(&data, 0, 10_000, None))
        .await;
    assert_eq!(status, StatusCode::OK);
    let id = first["partialIdentifier"].as_str().unwrap().to_string();
    assert_eq!(app.chunks.list_fragments(&id).await.unwrap().len(), 1);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let reaper = SessionReaper::new(
        Arc::clone(&app.tracker),
        app.chunks.clone(),
        app.pool.active(),
        Duration::ZERO,
    );
    let report = reaper.reap().await.unwrap();
    assert_eq!(report.sessions, 1);
    assert_eq!(report.fragments, 1);
    assert!(app.chunks.list_fragments(&id).await.unwrap().is_empty());

    let (status, body) = app
        .upload_chunk(ChunkRequest::slice(&data, 10_000, 20_000, Some(&id)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");
    assert!(app.store.files().await.is_empty());
    assert!(app.chunks.list_identifiers().await.unwrap().is_empty());
}
