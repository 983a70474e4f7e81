//! Upload lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Links attached to a finished upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadLinks {
    /// Direct content URL (`{domain}/raw/{name}`).
    pub raw: String,
    /// The URL returned to the uploader.
    pub returned: String,
}

/// Emitted after a file's content has been written to the content store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCompleted {
    /// File record ID.
    pub file_id: Uuid,
    /// Stored file name.
    pub file_name: String,
    /// MIME type.
    pub mime_type: String,
    /// Final size in bytes.
    pub size: u64,
    /// Uploading user.
    pub user_id: Uuid,
    /// Uploading user's name.
    pub username: String,
    /// Whether the file arrived through the chunked path.
    pub chunked: bool,
    /// Public links.
    pub links: UploadLinks,
    /// When the upload finished.
    pub completed_at: DateTime<Utc>,
}
