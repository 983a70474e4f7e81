//! Folder entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A folder that groups uploads.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Folder {
    /// Unique folder identifier.
    pub id: Uuid,
    /// Folder name.
    pub name: String,
    /// The folder owner.
    pub user_id: Uuid,
    /// Whether users other than the owner (or anonymous clients) may upload into it.
    pub allow_uploads: bool,
    /// When the folder was created.
    pub created_at: DateTime<Utc>,
}

impl Folder {
    /// Whether `uploader` may place a file in this folder.
    pub fn accepts_upload_from(&self, uploader: Option<Uuid>) -> bool {
        uploader == Some(self.user_id) || self.allow_uploads
    }
}
