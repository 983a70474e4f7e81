//! Incomplete file (assembly progress) repository implementation.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use zipline_core::error::{AppError, ErrorKind};
use zipline_core::result::AppResult;
use zipline_entity::file::{IncompleteFile, IncompleteFileMetadata, IncompleteFileStatus};

use super::IncompleteFileRepository;

/// PostgreSQL incomplete file repository.
#[derive(Debug, Clone)]
pub struct PgIncompleteFileRepository {
    pool: PgPool,
}

impl PgIncompleteFileRepository {
    /// Create a new incomplete file repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IncompleteFileRepository for PgIncompleteFileRepository {
    async fn create(
        &self,
        user_id: Uuid,
        chunks_total: i32,
        metadata: IncompleteFileMetadata,
    ) -> AppResult<IncompleteFile> {
        sqlx::query_as::<_, IncompleteFile>(
            "INSERT INTO incomplete_files (id, status, chunks_total, chunks_complete, user_id, metadata) \
             VALUES ($1, 'PENDING', $2, 0, $3, $4) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(chunks_total)
        .bind(user_id)
        .bind(Json(metadata))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to create incomplete file", e)
        })
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<IncompleteFile>> {
        sqlx::query_as::<_, IncompleteFile>("SELECT * FROM incomplete_files WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to find incomplete file", e)
            })
    }

    async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<IncompleteFile>> {
        sqlx::query_as::<_, IncompleteFile>(
            "SELECT * FROM incomplete_files WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to list incomplete files", e)
        })
    }

    async fn record_chunk(&self, id: Uuid) -> AppResult<IncompleteFile> {
        sqlx::query_as::<_, IncompleteFile>(
            "UPDATE incomplete_files \
             SET chunks_complete = chunks_complete + 1, status = 'PROCESSING', updated_at = NOW() \
             WHERE id = $1 AND status IN ('PENDING', 'PROCESSING') \
             AND chunks_complete < chunks_total \
             RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to record folded chunk", e)
        })?
        .ok_or_else(|| {
            AppError::conflict(format!(
                "Incomplete file {id} is terminal, missing, or already fully counted"
            ))
        })
    }

    async fn set_status(&self, id: Uuid, status: IncompleteFileStatus) -> AppResult<bool> {
        // Nothing moves back to PENDING.
        if status == IncompleteFileStatus::Pending {
            return Ok(false);
        }

        let result = sqlx::query(
            "UPDATE incomplete_files SET status = $2, updated_at = NOW() \
             WHERE id = $1 AND status IN ('PENDING', 'PROCESSING')",
        )
        .bind(id)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to update incomplete file", e)
        })?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_for_user(&self, user_id: Uuid, ids: &[Uuid]) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM incomplete_files \
             WHERE user_id = $1 AND id = ANY($2) AND status <> 'PROCESSING'",
        )
        .bind(user_id)
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to delete incomplete files", e)
        })?;
        Ok(result.rows_affected())
    }
}
