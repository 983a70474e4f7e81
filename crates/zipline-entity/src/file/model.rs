//! File entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A stored upload.
///
/// `size == 0` means the content is still being assembled.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FileRecord {
    /// Unique file identifier.
    pub id: Uuid,
    /// Final stored name including extension. Also the content store key.
    pub name: String,
    /// Client-supplied name, kept when the uploader asked for it.
    pub original_name: Option<String>,
    /// Size in bytes.
    pub size: i64,
    /// MIME type of the content.
    pub mime_type: String,
    /// Argon2 hash of the access password.
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// View limit after which the file is no longer served.
    pub max_views: Option<i32>,
    /// Number of times the file was served.
    pub views: i32,
    /// When the file expires.
    pub deletes_at: Option<DateTime<Utc>>,
    /// Containing folder.
    pub folder_id: Option<Uuid>,
    /// Owning user.
    pub user_id: Uuid,
    /// When the file was created.
    pub created_at: DateTime<Utc>,
    /// When the file was last updated.
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Whether the content has not been assembled yet.
    pub fn is_pending(&self) -> bool {
        self.size == 0
    }

    /// Whether the file is past its expiry or view limit.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.deletes_at.is_some_and(|at| at <= now) {
            return true;
        }
        self.max_views.is_some_and(|max| self.views >= max)
    }

    /// Get the file extension (lowercase), if any.
    pub fn extension(&self) -> Option<String> {
        self.name
            .rsplit('.')
            .next()
            .filter(|ext| *ext != self.name)
            .map(|ext| ext.to_lowercase())
    }
}

/// Data required to create a new file record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFileRecord {
    /// Final stored name.
    pub name: String,
    /// Client-supplied name.
    pub original_name: Option<String>,
    /// Initial size (0 for pending chunked uploads).
    pub size: i64,
    /// MIME type.
    pub mime_type: String,
    /// Argon2 hash of the access password.
    pub password: Option<String>,
    /// View limit.
    pub max_views: Option<i32>,
    /// Expiry.
    pub deletes_at: Option<DateTime<Utc>>,
    /// Containing folder.
    pub folder_id: Option<Uuid>,
    /// Owning user.
    pub user_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            original_name: None,
            size: 0,
            mime_type: "application/octet-stream".to_string(),
            password: None,
            max_views: None,
            views: 0,
            deletes_at: None,
            folder_id: None,
            user_id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_extension() {
        assert_eq!(record("clip.MP4").extension().as_deref(), Some("mp4"));
        assert_eq!(record("README").extension(), None);
    }

    #[test]
    fn test_expiry_by_views_and_date() {
        let now = Utc::now();
        let mut file = record("a.txt");
        assert!(!file.is_expired(now));

        file.max_views = Some(2);
        file.views = 2;
        assert!(file.is_expired(now));

        file.max_views = None;
        file.deletes_at = Some(now - chrono::Duration::seconds(1));
        assert!(file.is_expired(now));
    }
}
