//! Upload value objects.

pub mod options;

pub use options::UploadOptions;
