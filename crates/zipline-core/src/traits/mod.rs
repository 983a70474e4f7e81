//! Core traits defined in `zipline-core` and implemented by other crates.

pub mod notifier;
pub mod storage;

pub use notifier::UploadNotifier;
pub use storage::{AssemblySink, ByteStream, StorageProvider};
