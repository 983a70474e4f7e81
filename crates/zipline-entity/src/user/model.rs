//! User entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    /// Unique user identifier.
    pub id: Uuid,
    /// Unique login name.
    pub username: String,
    /// API token sent in the `Authorization` header.
    #[serde(skip_serializing)]
    pub token: String,
    /// When the user was created.
    pub created_at: DateTime<Utc>,
}
