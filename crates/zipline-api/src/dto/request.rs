//! Request DTOs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// DELETE /api/user/files/incomplete body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteIncompleteRequest {
    /// Records to delete.
    pub id: Vec<Uuid>,
}

/// Query of GET /raw/{name}.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawQuery {
    /// Access password for protected files.
    pub pw: Option<String>,
}
