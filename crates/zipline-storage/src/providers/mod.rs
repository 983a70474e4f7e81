//! Storage provider implementations.

pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

use std::sync::Arc;

use zipline_core::config::{StorageBackend, StorageConfig};
use zipline_core::result::AppResult;
use zipline_core::traits::storage::StorageProvider;

pub use local::LocalStorageProvider;
#[cfg(feature = "s3")]
pub use s3::S3StorageProvider;

/// Build the configured content store.
///
/// `part_size` is the multipart part size for object-store assemblies
/// (`chunks.size_bytes`).
pub async fn from_config(
    config: &StorageConfig,
    part_size: u64,
) -> AppResult<Arc<dyn StorageProvider>> {
    match config.backend {
        StorageBackend::Local => {
            let provider = LocalStorageProvider::new(&config.local.root_path).await?;
            Ok(Arc::new(provider))
        }
        #[cfg(feature = "s3")]
        StorageBackend::S3 => {
            let provider = S3StorageProvider::new(&config.s3, part_size).await?;
            Ok(Arc::new(provider))
        }
        #[cfg(not(feature = "s3"))]
        StorageBackend::S3 => {
            let _ = part_size;
            Err(zipline_core::AppError::configuration(
                "storage.backend = \"s3\" requires the `s3` feature",
            ))
        }
    }
}
