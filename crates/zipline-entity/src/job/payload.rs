//! Assembly job payload.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::upload::UploadOptions;

/// Everything the assembly worker needs, captured at last-chunk time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyJob {
    /// Upload session identifier (fragment key prefix).
    pub identifier: String,
    /// File owner.
    pub user_id: Uuid,
    /// Target file record.
    pub file_id: Uuid,
    /// Target file name (content store key).
    pub file_name: String,
    /// Target MIME type.
    pub mime_type: String,
    /// Options frozen at chunk 0.
    pub options: Arc<UploadOptions>,
    /// Declared total size from the content-range header.
    pub total_size: u64,
    /// Number of chunks the session accepted.
    pub expected_chunks: u32,
    /// `scheme://host` used to build links.
    pub domain: String,
    /// URL already returned to the client.
    pub response_url: String,
}

impl AssemblyJob {
    /// Direct content URL for the assembled file.
    pub fn raw_url(&self) -> String {
        format!("{}/raw/{}", self.domain, self.file_name)
    }
}
