//! Per-upload directives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zipline_core::config::FileNameFormat;

/// Directives captured from the first request of an upload.
///
/// Built once and shared (`Arc`) by every later chunk, the registrar and the
/// assembly job, so all stages of one upload apply identical policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOptions {
    /// Name generation format.
    pub format: FileNameFormat,
    /// Expiry timestamp.
    pub deletes_at: Option<DateTime<Utc>>,
    /// Plain access password. Never serialized; the registrar stores a hash.
    #[serde(skip)]
    pub password: Option<String>,
    /// View limit.
    pub max_views: Option<i32>,
    /// Keep the client-supplied name on the record.
    pub add_original_name: bool,
    /// Target folder.
    pub folder: Option<Uuid>,
    /// Explicit stored name (without extension).
    pub override_filename: Option<String>,
    /// Explicit extension (with leading dot).
    pub override_extension: Option<String>,
    /// Domain for returned URLs.
    pub override_domain: Option<String>,
    /// Replace an existing file with the same name.
    pub overwrite: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            format: FileNameFormat::Random,
            deletes_at: None,
            password: None,
            max_views: None,
            add_original_name: false,
            folder: None,
            override_filename: None,
            override_extension: None,
            override_domain: None,
            overwrite: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_is_not_serialized() {
        let options = UploadOptions {
            password: Some("hunter2".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&options).unwrap();
        assert!(!json.contains("hunter2"));

        let back: UploadOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back.password, None);
        assert_eq!(back.format, FileNameFormat::Random);
    }
}
