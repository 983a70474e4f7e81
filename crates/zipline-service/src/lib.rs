//! # zipline-service
//!
//! Upload services for Zipline. Parses upload headers, tracks chunked
//! upload sessions across requests, generates stored names, registers
//! pending files and hands them to the assembly worker pool.
//!
//! Services follow constructor injection: all dependencies are provided
//! at construction time via `Arc` references.

pub mod notification;
pub mod password;
pub mod upload;

pub use notification::WebhookNotifier;
pub use password::PasswordHasher;
pub use upload::{
    AssemblyDispatcher, HeaderError, MetadataRegistrar, PartialUploadResponse,
    PartialUploadService, SessionError, SessionTracker, UploadError,
};
