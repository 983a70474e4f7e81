//! Content store traits for pluggable storage backends.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::result::AppResult;

/// A byte stream type used for reading file contents.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Trait for the content store holding finished uploads.
///
/// Implementations exist for the local filesystem and S3-compatible
/// object storage. Keys are flat file names.
#[async_trait]
pub trait StorageProvider: Send + Sync + std::fmt::Debug + 'static {
    /// Return the provider type name (e.g., "local", "s3").
    fn provider_type(&self) -> &str;

    /// Check whether the provider is healthy and reachable.
    async fn health_check(&self) -> AppResult<bool>;

    /// Store a complete object.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> AppResult<()>;

    /// Stream an object's full content.
    async fn get(&self, key: &str) -> AppResult<ByteStream>;

    /// Read the byte range `[start, end)` of an object.
    async fn range(&self, key: &str, start: u64, end: u64) -> AppResult<Bytes>;

    /// Size of an object in bytes.
    async fn size(&self, key: &str) -> AppResult<u64>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Open a sink that assembles an object from ordered writes.
    ///
    /// Nothing is visible under `key` until [`AssemblySink::commit`]
    /// succeeds.
    async fn begin_assembly(&self, key: &str, content_type: &str)
    -> AppResult<Box<dyn AssemblySink>>;
}

/// Incremental writer for assembling one object from fragments.
///
/// Writes arrive in ascending, contiguous offset order starting at 0.
#[async_trait]
pub trait AssemblySink: Send {
    /// Append `data`, which must start at byte `offset` of the object.
    async fn write_at(&mut self, offset: u64, data: Bytes) -> AppResult<()>;

    /// Finish the object and make it visible. Returns the final size.
    async fn commit(self: Box<Self>) -> AppResult<u64>;

    /// Discard everything written so far.
    async fn abort(self: Box<Self>) -> AppResult<()>;
}
