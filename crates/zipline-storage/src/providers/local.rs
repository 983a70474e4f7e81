//! Local filesystem storage provider.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::StreamExt;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use zipline_core::error::{AppError, ErrorKind};
use zipline_core::result::AppResult;
use zipline_core::traits::storage::{AssemblySink, ByteStream, StorageProvider};

/// Directory under the root holding in-progress assemblies.
const STAGING_DIR: &str = ".assembling";

/// Local filesystem storage provider.
#[derive(Debug, Clone)]
pub struct LocalStorageProvider {
    /// Root directory for all stored files.
    root: PathBuf,
}

impl LocalStorageProvider {
    /// Create a new local storage provider rooted at the given path.
    pub async fn new(root_path: &str) -> AppResult<Self> {
        let root = PathBuf::from(root_path);
        fs::create_dir_all(root.join(STAGING_DIR))
            .await
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Storage,
                    format!("Failed to create storage root: {}", root.display()),
                    e,
                )
            })?;
        Ok(Self { root })
    }

    /// Resolve a key to a path inside the root.
    ///
    /// Keys are flat names. Anything that could escape the root or reach
    /// the staging area is rejected.
    fn resolve(&self, key: &str) -> AppResult<PathBuf> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains('/')
            || key.contains('\\')
            || key.contains('\0')
        {
            return Err(AppError::validation(format!("Invalid storage key: {key}")));
        }
        Ok(self.root.join(key))
    }
}

fn open_error(key: &str, e: std::io::Error) -> AppError {
    if e.kind() == std::io::ErrorKind::NotFound {
        AppError::not_found(format!("File not found: {key}"))
    } else {
        AppError::with_source(ErrorKind::Storage, format!("Failed to open file: {key}"), e)
    }
}

#[async_trait]
impl StorageProvider for LocalStorageProvider {
    fn provider_type(&self) -> &str {
        "local"
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }

    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> AppResult<()> {
        let path = self.resolve(key)?;
        fs::write(&path, &data).await.map_err(|e| {
            AppError::with_source(ErrorKind::Storage, format!("Failed to write file: {key}"), e)
        })?;

        debug!(key, bytes = data.len(), "Wrote file");
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<ByteStream> {
        let path = self.resolve(key)?;
        let file = fs::File::open(&path).await.map_err(|e| open_error(key, e))?;
        let stream = ReaderStream::new(file);
        Ok(Box::pin(stream.map(|r| r.map(Bytes::from))))
    }

    async fn range(&self, key: &str, start: u64, end: u64) -> AppResult<Bytes> {
        let path = self.resolve(key)?;
        let mut file = fs::File::open(&path).await.map_err(|e| open_error(key, e))?;
        let size = file.metadata().await?.len();

        let end = end.min(size);
        if start > end {
            return Err(AppError::validation(format!(
                "Range {start}-{end} is outside of {key} ({size} bytes)"
            )));
        }

        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf).await.map_err(|e| {
            AppError::with_source(ErrorKind::Storage, format!("Failed to read range: {key}"), e)
        })?;
        Ok(Bytes::from(buf))
    }

    async fn size(&self, key: &str) -> AppResult<u64> {
        let path = self.resolve(key)?;
        let meta = fs::metadata(&path).await.map_err(|e| open_error(key, e))?;
        Ok(meta.len())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to delete file: {key}"),
                e,
            )),
        }
    }

    async fn begin_assembly(
        &self,
        key: &str,
        _content_type: &str,
    ) -> AppResult<Box<dyn AssemblySink>> {
        let target = self.resolve(key)?;
        let staging = self
            .root
            .join(STAGING_DIR)
            .join(format!("{key}.{}", Uuid::new_v4().simple()));

        let file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&staging)
            .await
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Storage,
                    format!("Failed to create staging file for {key}"),
                    e,
                )
            })?;

        debug!(key, staging = %staging.display(), "Started local assembly");
        Ok(Box::new(LocalAssemblySink {
            file,
            staging,
            target,
            len: 0,
        }))
    }
}

/// Assembles into a staging file, renamed over the target on commit.
#[derive(Debug)]
pub struct LocalAssemblySink {
    file: fs::File,
    staging: PathBuf,
    target: PathBuf,
    len: u64,
}

#[async_trait]
impl AssemblySink for LocalAssemblySink {
    async fn write_at(&mut self, offset: u64, data: Bytes) -> AppResult<()> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(&data).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to write at offset {offset}"),
                e,
            )
        })?;
        self.len = self.len.max(offset + data.len() as u64);
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> AppResult<u64> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        if let Err(e) = fs::rename(&self.staging, &self.target).await {
            let _ = remove_staging(&self.staging).await;
            return Err(AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to move assembled file to {}", self.target.display()),
                e,
            ));
        }
        debug!(target = %self.target.display(), bytes = self.len, "Committed local assembly");
        Ok(self.len)
    }

    async fn abort(self: Box<Self>) -> AppResult<()> {
        let Self { file, staging, .. } = *self;
        drop(file);
        remove_staging(&staging).await
    }
}

async fn remove_staging(path: &Path) -> AppResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove staging file");
            Err(AppError::with_source(
                ErrorKind::Storage,
                "Failed to remove staging file",
                e,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn provider() -> (tempfile::TempDir, LocalStorageProvider) {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalStorageProvider::new(dir.path().to_str().unwrap())
            .await
            .unwrap();
        (dir, provider)
    }

    #[tokio::test]
    async fn test_put_get_range_delete() {
        let (_dir, provider) = provider().await;

        provider
            .put("hello.txt", Bytes::from("hello world"), "text/plain")
            .await
            .unwrap();
        assert_eq!(provider.size("hello.txt").await.unwrap(), 11);

        let chunks: Vec<Bytes> = provider
            .get("hello.txt")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), b"hello world");

        let range = provider.range("hello.txt", 6, 11).await.unwrap();
        assert_eq!(&range[..], b"world");
        let clamped = provider.range("hello.txt", 6, 100).await.unwrap();
        assert_eq!(&clamped[..], b"world");

        provider.delete("hello.txt").await.unwrap();
        assert!(provider.size("hello.txt").await.unwrap_err().is_not_found());
        provider.delete("hello.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (_dir, provider) = provider().await;
        assert!(provider.get("../etc/passwd").await.is_err());
        assert!(provider.get(".assembling").await.is_err());
        assert!(provider.get("a/b").await.is_err());
    }

    #[tokio::test]
    async fn test_assembly_is_invisible_until_commit() {
        let (dir, provider) = provider().await;

        let mut sink = provider.begin_assembly("big.bin", "application/octet-stream").await.unwrap();
        sink.write_at(0, Bytes::from("abc")).await.unwrap();
        sink.write_at(3, Bytes::from("def")).await.unwrap();
        assert!(provider.size("big.bin").await.unwrap_err().is_not_found());

        assert_eq!(sink.commit().await.unwrap(), 6);
        let data = provider.range("big.bin", 0, 6).await.unwrap();
        assert_eq!(&data[..], b"abcdef");

        let staging = std::fs::read_dir(dir.path().join(STAGING_DIR)).unwrap().count();
        assert_eq!(staging, 0);
    }

    #[tokio::test]
    async fn test_abort_removes_staging() {
        let (dir, provider) = provider().await;

        let mut sink = provider.begin_assembly("gone.bin", "application/octet-stream").await.unwrap();
        sink.write_at(0, Bytes::from("partial")).await.unwrap();
        sink.abort().await.unwrap();

        assert!(provider.size("gone.bin").await.unwrap_err().is_not_found());
        let staging = std::fs::read_dir(dir.path().join(STAGING_DIR)).unwrap().count();
        assert_eq!(staging, 0);
    }
}
