//! Chunked upload fragment storage.

pub mod cleanup;
pub mod fragment;
pub mod store;

pub use cleanup::OrphanFragmentSweeper;
pub use fragment::{ChunkFragment, CoverageError, verify_coverage};
pub use store::ChunkStore;
