//! Assembly progress records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

/// Status of one assembly run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "incomplete_file_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum IncompleteFileStatus {
    /// Created, no fragment folded yet.
    Pending,
    /// Folding fragments into the destination.
    Processing,
    /// Content stored and metadata updated.
    Complete,
    /// Assembly gave up.
    Failed,
}

impl IncompleteFileStatus {
    /// COMPLETE and FAILED are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Processing => matches!(next, Self::Processing | Self::Complete | Self::Failed),
            Self::Complete | Self::Failed => false,
        }
    }

    /// Return the status as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for IncompleteFileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The file an assembly run is producing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteFileMetadata {
    /// Target file record.
    pub file_id: Uuid,
    /// Target file name.
    pub file_name: String,
    /// Target MIME type.
    pub mime_type: String,
}

/// Progress of one assembly run, polled by clients.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct IncompleteFile {
    /// Unique record identifier.
    pub id: Uuid,
    /// Current status.
    pub status: IncompleteFileStatus,
    /// Number of fragments to fold.
    pub chunks_total: i32,
    /// Number of fragments folded so far.
    pub chunks_complete: i32,
    /// Uploading user.
    pub user_id: Uuid,
    /// Target file.
    pub metadata: Json<IncompleteFileMetadata>,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl IncompleteFile {
    /// Progress as a percentage (0-100).
    pub fn progress_percent(&self) -> f64 {
        if self.chunks_total <= 0 {
            return 0.0;
        }
        (self.chunks_complete as f64 / self.chunks_total as f64) * 100.0
    }
}
