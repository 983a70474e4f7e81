//! Domain events emitted by upload operations.

pub mod upload;

pub use upload::{UploadCompleted, UploadLinks};
