//! File domain entities.

pub mod incomplete;
pub mod model;

pub use incomplete::{IncompleteFile, IncompleteFileMetadata, IncompleteFileStatus};
pub use model::{CreateFileRecord, FileRecord};
