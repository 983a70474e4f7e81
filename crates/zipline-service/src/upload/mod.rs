//! Chunked upload pipeline: headers, sessions, naming, registration and
//! orchestration.

pub mod headers;
pub mod naming;
pub mod partial;
pub mod registrar;
pub mod session;

pub use headers::{HeaderError, PartialChunk, parse_partial, parse_upload_headers};
pub use partial::{AssemblyDispatcher, PartialUploadResponse, PartialUploadService, UploadError};
pub use registrar::{MetadataRegistrar, Registration, UploadedFileEntry};
pub use session::{SessionError, SessionTracker, UploadSession};
