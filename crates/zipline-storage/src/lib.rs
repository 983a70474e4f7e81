//! # zipline-storage
//!
//! Content store providers for Zipline (local filesystem and
//! S3-compatible object storage) and the temp-directory fragment store
//! used by chunked uploads.

pub mod chunked;
pub mod mime;
pub mod providers;

pub use chunked::{ChunkFragment, ChunkStore};
pub use providers::{LocalStorageProvider, from_config};
