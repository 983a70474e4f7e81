//! File repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use zipline_core::error::{AppError, ErrorKind};
use zipline_core::result::AppResult;
use zipline_entity::file::{CreateFileRecord, FileRecord};

use super::FileRepository;

/// PostgreSQL file repository.
#[derive(Debug, Clone)]
pub struct PgFileRepository {
    pool: PgPool,
}

impl PgFileRepository {
    /// Create a new file repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileRepository for PgFileRepository {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<FileRecord>> {
        sqlx::query_as::<_, FileRecord>("SELECT * FROM files WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find file", e))
    }

    async fn find_by_name(&self, name: &str) -> AppResult<Option<FileRecord>> {
        sqlx::query_as::<_, FileRecord>("SELECT * FROM files WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to find file by name", e)
            })
    }

    async fn find_by_name_prefix(&self, prefix: &str) -> AppResult<Option<FileRecord>> {
        let pattern = format!("{}%", escape_like(prefix));
        sqlx::query_as::<_, FileRecord>(
            "SELECT * FROM files WHERE name LIKE $1 ESCAPE '\\' ORDER BY created_at ASC LIMIT 1",
        )
        .bind(pattern)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to find file by prefix", e)
        })
    }

    async fn create(&self, data: &CreateFileRecord) -> AppResult<FileRecord> {
        let file = sqlx::query_as::<_, FileRecord>(
            "INSERT INTO files (id, name, original_name, size, mime_type, password, \
             max_views, deletes_at, folder_id, user_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&data.name)
        .bind(&data.original_name)
        .bind(data.size)
        .bind(&data.mime_type)
        .bind(&data.password)
        .bind(data.max_views)
        .bind(data.deletes_at)
        .bind(data.folder_id)
        .bind(data.user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(file)
    }

    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to delete file", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn complete_upload(
        &self,
        id: Uuid,
        size: i64,
        max_views: Option<i32>,
        deletes_at: Option<DateTime<Utc>>,
    ) -> AppResult<FileRecord> {
        sqlx::query_as::<_, FileRecord>(
            "UPDATE files SET size = $2, max_views = COALESCE($3, max_views), \
             deletes_at = COALESCE($4, deletes_at), updated_at = NOW() \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(size)
        .bind(max_views)
        .bind(deletes_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to complete upload", e))?
        .ok_or_else(|| AppError::not_found(format!("File {id} not found")))
    }

    async fn increment_views(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE files SET views = views + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to increment views", e)
            })?;
        Ok(())
    }
}

/// Escape `LIKE` metacharacters so file names match literally.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
