//! Repository traits used by the upload pipeline and their PostgreSQL
//! implementations.

pub mod file;
pub mod folder;
pub mod incomplete_file;
pub mod user;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use zipline_core::result::AppResult;
use zipline_entity::file::{
    CreateFileRecord, FileRecord, IncompleteFile, IncompleteFileMetadata, IncompleteFileStatus,
};
use zipline_entity::folder::Folder;
use zipline_entity::user::User;

use crate::memory::MemoryStore;

pub use file::PgFileRepository;
pub use folder::PgFolderRepository;
pub use incomplete_file::PgIncompleteFileRepository;
pub use user::PgUserRepository;

/// File record persistence.
#[async_trait]
pub trait FileRepository: Send + Sync + 'static {
    /// Find a file by ID.
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<FileRecord>>;

    /// Find a file by its exact stored name.
    async fn find_by_name(&self, name: &str) -> AppResult<Option<FileRecord>>;

    /// Find any file whose name starts with `prefix`.
    async fn find_by_name_prefix(&self, prefix: &str) -> AppResult<Option<FileRecord>>;

    /// Insert a record. A taken name is a `Conflict` error.
    async fn create(&self, data: &CreateFileRecord) -> AppResult<FileRecord>;

    /// Delete a record. Returns `true` if it existed.
    async fn delete(&self, id: Uuid) -> AppResult<bool>;

    /// Record the assembled size and apply deferred limits.
    async fn complete_upload(
        &self,
        id: Uuid,
        size: i64,
        max_views: Option<i32>,
        deletes_at: Option<DateTime<Utc>>,
    ) -> AppResult<FileRecord>;

    /// Count one view.
    async fn increment_views(&self, id: Uuid) -> AppResult<()>;
}

/// Folder lookups.
#[async_trait]
pub trait FolderRepository: Send + Sync + 'static {
    /// Find a folder by ID.
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Folder>>;
}

/// User lookups.
#[async_trait]
pub trait UserRepository: Send + Sync + 'static {
    /// Find a user by ID.
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>>;

    /// Find the user owning an API token.
    async fn find_by_token(&self, token: &str) -> AppResult<Option<User>>;
}

/// Assembly progress persistence.
///
/// Every mutation is conditional on the row not being in a terminal
/// status, so COMPLETE and FAILED are never left.
#[async_trait]
pub trait IncompleteFileRepository: Send + Sync + 'static {
    /// Create a PENDING record.
    async fn create(
        &self,
        user_id: Uuid,
        chunks_total: i32,
        metadata: IncompleteFileMetadata,
    ) -> AppResult<IncompleteFile>;

    /// Find a record by ID.
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<IncompleteFile>>;

    /// All records owned by a user, newest first.
    async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<IncompleteFile>>;

    /// Count one folded fragment and move to PROCESSING.
    ///
    /// Fails with `Conflict` when the record is terminal or already at
    /// `chunks_total`.
    async fn record_chunk(&self, id: Uuid) -> AppResult<IncompleteFile>;

    /// Move to `status` if the state machine allows it. Returns `false`
    /// when the record is missing or the transition is not allowed.
    async fn set_status(&self, id: Uuid, status: IncompleteFileStatus) -> AppResult<bool>;

    /// Delete the user's records among `ids` that are not PROCESSING.
    /// Returns the number deleted.
    async fn delete_for_user(&self, user_id: Uuid, ids: &[Uuid]) -> AppResult<u64>;
}

/// The repositories the upload pipeline needs, bundled for injection.
#[derive(Clone)]
pub struct Repositories {
    /// File records.
    pub files: Arc<dyn FileRepository>,
    /// Folders.
    pub folders: Arc<dyn FolderRepository>,
    /// Users.
    pub users: Arc<dyn UserRepository>,
    /// Assembly progress.
    pub incomplete_files: Arc<dyn IncompleteFileRepository>,
}

impl Repositories {
    /// PostgreSQL-backed repositories sharing one pool.
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            files: Arc::new(PgFileRepository::new(pool.clone())),
            folders: Arc::new(PgFolderRepository::new(pool.clone())),
            users: Arc::new(PgUserRepository::new(pool.clone())),
            incomplete_files: Arc::new(PgIncompleteFileRepository::new(pool)),
        }
    }

    /// Repositories backed by one in-memory store.
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            files: store.clone(),
            folders: store.clone(),
            users: store.clone(),
            incomplete_files: store,
        }
    }
}

impl std::fmt::Debug for Repositories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repositories").finish_non_exhaustive()
    }
}
