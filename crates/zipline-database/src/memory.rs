//! In-memory repository set.
//!
//! Implements every repository trait over plain maps behind one async
//! mutex, with the same uniqueness and status-transition rules as the
//! PostgreSQL schema. Used by the test suites and for single-node
//! development without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use tokio::sync::Mutex;
use uuid::Uuid;

use zipline_core::error::AppError;
use zipline_core::result::AppResult;
use zipline_entity::file::{
    CreateFileRecord, FileRecord, IncompleteFile, IncompleteFileMetadata, IncompleteFileStatus,
};
use zipline_entity::folder::Folder;
use zipline_entity::user::User;

use crate::repositories::{
    FileRepository, FolderRepository, IncompleteFileRepository, UserRepository,
};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    folders: HashMap<Uuid, Folder>,
    files: HashMap<Uuid, FileRecord>,
    incomplete_files: HashMap<Uuid, IncompleteFile>,
}

/// Repository set held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a user with the given name and token.
    pub async fn add_user(&self, username: &str, token: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            token: token.to_string(),
            created_at: Utc::now(),
        };
        self.tables.lock().await.users.insert(user.id, user.clone());
        user
    }

    /// Insert a folder owned by `user_id`.
    pub async fn add_folder(&self, user_id: Uuid, name: &str, allow_uploads: bool) -> Folder {
        let folder = Folder {
            id: Uuid::new_v4(),
            name: name.to_string(),
            user_id,
            allow_uploads,
            created_at: Utc::now(),
        };
        self.tables
            .lock()
            .await
            .folders
            .insert(folder.id, folder.clone());
        folder
    }

    /// Snapshot of all file records.
    pub async fn files(&self) -> Vec<FileRecord> {
        self.tables.lock().await.files.values().cloned().collect()
    }

    /// Snapshot of all incomplete file records.
    pub async fn incomplete_files(&self) -> Vec<IncompleteFile> {
        self.tables
            .lock()
            .await
            .incomplete_files
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl FileRepository for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<FileRecord>> {
        Ok(self.tables.lock().await.files.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> AppResult<Option<FileRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables.files.values().find(|f| f.name == name).cloned())
    }

    async fn find_by_name_prefix(&self, prefix: &str) -> AppResult<Option<FileRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .files
            .values()
            .filter(|f| f.name.starts_with(prefix))
            .min_by_key(|f| f.created_at)
            .cloned())
    }

    async fn create(&self, data: &CreateFileRecord) -> AppResult<FileRecord> {
        let mut tables = self.tables.lock().await;
        if tables.files.values().any(|f| f.name == data.name) {
            return Err(AppError::conflict(format!(
                "A file named '{}' already exists",
                data.name
            )));
        }

        let now = Utc::now();
        let file = FileRecord {
            id: Uuid::new_v4(),
            name: data.name.clone(),
            original_name: data.original_name.clone(),
            size: data.size,
            mime_type: data.mime_type.clone(),
            password: data.password.clone(),
            max_views: data.max_views,
            views: 0,
            deletes_at: data.deletes_at,
            folder_id: data.folder_id,
            user_id: data.user_id,
            created_at: now,
            updated_at: now,
        };
        tables.files.insert(file.id, file.clone());
        Ok(file)
    }

    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        Ok(self.tables.lock().await.files.remove(&id).is_some())
    }

    async fn complete_upload(
        &self,
        id: Uuid,
        size: i64,
        max_views: Option<i32>,
        deletes_at: Option<DateTime<Utc>>,
    ) -> AppResult<FileRecord> {
        let mut tables = self.tables.lock().await;
        let file = tables
            .files
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("File {id} not found")))?;
        file.size = size;
        if max_views.is_some() {
            file.max_views = max_views;
        }
        if deletes_at.is_some() {
            file.deletes_at = deletes_at;
        }
        file.updated_at = Utc::now();
        Ok(file.clone())
    }

    async fn increment_views(&self, id: Uuid) -> AppResult<()> {
        if let Some(file) = self.tables.lock().await.files.get_mut(&id) {
            file.views += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl FolderRepository for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Folder>> {
        Ok(self.tables.lock().await.folders.get(&id).cloned())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_by_token(&self, token: &str) -> AppResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|u| u.token == token).cloned())
    }
}

#[async_trait]
impl IncompleteFileRepository for MemoryStore {
    async fn create(
        &self,
        user_id: Uuid,
        chunks_total: i32,
        metadata: IncompleteFileMetadata,
    ) -> AppResult<IncompleteFile> {
        let now = Utc::now();
        let record = IncompleteFile {
            id: Uuid::new_v4(),
            status: IncompleteFileStatus::Pending,
            chunks_total,
            chunks_complete: 0,
            user_id,
            metadata: Json(metadata),
            created_at: now,
            updated_at: now,
        };
        self.tables
            .lock()
            .await
            .incomplete_files
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<IncompleteFile>> {
        Ok(self.tables.lock().await.incomplete_files.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<IncompleteFile>> {
        let tables = self.tables.lock().await;
        let mut records: Vec<_> = tables
            .incomplete_files
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn record_chunk(&self, id: Uuid) -> AppResult<IncompleteFile> {
        let mut tables = self.tables.lock().await;
        let record = tables
            .incomplete_files
            .get_mut(&id)
            .filter(|r| !r.status.is_terminal() && r.chunks_complete < r.chunks_total)
            .ok_or_else(|| {
                AppError::conflict(format!(
                    "Incomplete file {id} is terminal, missing, or already fully counted"
                ))
            })?;
        record.chunks_complete += 1;
        record.status = IncompleteFileStatus::Processing;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn set_status(&self, id: Uuid, status: IncompleteFileStatus) -> AppResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.incomplete_files.get_mut(&id) {
            Some(record) if record.status.can_transition_to(status) => {
                record.status = status;
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_for_user(&self, user_id: Uuid, ids: &[Uuid]) -> AppResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.incomplete_files.len();
        tables.incomplete_files.retain(|id, r| {
            !(r.user_id == user_id
                && ids.contains(id)
                && r.status != IncompleteFileStatus::Processing)
        });
        Ok((before - tables.incomplete_files.len()) as u64)
    }
}
