//! Assembly of chunk fragments into the final stored object.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use zipline_core::error::AppError;
use zipline_core::events::{UploadCompleted, UploadLinks};
use zipline_core::traits::{AssemblySink, StorageProvider, UploadNotifier};
use zipline_database::Repositories;
use zipline_entity::file::{FileRecord, IncompleteFile, IncompleteFileMetadata, IncompleteFileStatus};
use zipline_entity::job::AssemblyJob;
use zipline_storage::chunked::verify_coverage;
use zipline_storage::ChunkStore;

use crate::executor::JobHandler;

/// Where an assembly failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyStage {
    /// Creating the progress record.
    Track,
    /// Listing fragments and checking coverage.
    Verify,
    /// Opening the destination.
    Open,
    /// Copying fragments into the destination.
    Fold,
    /// Making the destination visible.
    Commit,
    /// Updating the file record.
    Finalize,
}

impl AssemblyStage {
    /// Lowercase stage name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Verify => "verify",
            Self::Open => "open",
            Self::Fold => "fold",
            Self::Commit => "commit",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for AssemblyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed assembly.
#[derive(Debug, thiserror::Error)]
#[error("assembly failed during {stage}: {source}")]
pub struct AssemblyError {
    /// Failing stage.
    pub stage: AssemblyStage,
    /// Underlying error.
    #[source]
    pub source: AppError,
}

trait StageExt<T> {
    fn at(self, stage: AssemblyStage) -> Result<T, AssemblyError>;
}

impl<T> StageExt<T> for Result<T, AppError> {
    fn at(self, stage: AssemblyStage) -> Result<T, AssemblyError> {
        self.map_err(|source| AssemblyError { stage, source })
    }
}

/// Folds an upload's fragments into the content store and reconciles its
/// metadata.
pub struct AssemblyHandler {
    repos: Repositories,
    storage: Arc<dyn StorageProvider>,
    chunk_store: ChunkStore,
    notifier: Arc<dyn UploadNotifier>,
}

impl fmt::Debug for AssemblyHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssemblyHandler")
            .field("storage", &self.storage.provider_type())
            .field("temp_directory", &self.chunk_store.dir())
            .finish_non_exhaustive()
    }
}

impl AssemblyHandler {
    /// Create a handler.
    pub fn new(
        repos: Repositories,
        storage: Arc<dyn StorageProvider>,
        chunk_store: ChunkStore,
        notifier: Arc<dyn UploadNotifier>,
    ) -> Self {
        Self {
            repos,
            storage,
            chunk_store,
            notifier,
        }
    }

    /// Assemble one upload.
    ///
    /// On failure the progress record ends FAILED, the destination is
    /// aborted, the fragments are removed and the file record stays pending.
    pub async fn assemble(&self, job: &AssemblyJob) -> Result<FileRecord, AssemblyError> {
        let progress = match self.track(job).await {
            Ok(p) => p,
            Err(e) => {
                self.chunk_store.delete_fragments(&job.identifier).await;
                return Err(e);
            }
        };

        match self.run(job, &progress).await {
            Ok(file) => {
                self.mark(&progress, IncompleteFileStatus::Complete).await;
                self.notify(job, &file).await;
                Ok(file)
            }
            Err(e) => {
                self.mark(&progress, IncompleteFileStatus::Failed).await;
                let removed = self.chunk_store.delete_fragments(&job.identifier).await;
                tracing::debug!(identifier = %job.identifier, removed, "Removed fragments of failed assembly");
                Err(e)
            }
        }
    }

    async fn track(&self, job: &AssemblyJob) -> Result<IncompleteFile, AssemblyError> {
        let chunks_total = i32::try_from(job.expected_chunks)
            .map_err(|_| AppError::validation("Too many chunks"))
            .at(AssemblyStage::Track)?;
        self.repos
            .incomplete_files
            .create(
                job.user_id,
                chunks_total,
                IncompleteFileMetadata {
                    file_id: job.file_id,
                    file_name: job.file_name.clone(),
                    mime_type: job.mime_type.clone(),
                },
            )
            .await
            .at(AssemblyStage::Track)
    }

    async fn run(
        &self,
        job: &AssemblyJob,
        progress: &IncompleteFile,
    ) -> Result<FileRecord, AssemblyError> {
        let fragments = self
            .chunk_store
            .list_fragments(&job.identifier)
            .await
            .at(AssemblyStage::Verify)?;
        verify_coverage(&fragments, job.total_size, job.expected_chunks as usize)
            .map_err(|e| AppError::validation(format!("Fragment integrity check failed: {e}")))
            .at(AssemblyStage::Verify)?;

        let mut sink = self
            .storage
            .begin_assembly(&job.file_name, &job.mime_type)
            .await
            .at(AssemblyStage::Open)?;

        if let Err(e) = self.fold(job, progress, sink.as_mut(), &fragments).await {
            if let Err(abort) = sink.abort().await {
                tracing::warn!(identifier = %job.identifier, error = %abort, "Failed to abort assembly");
            }
            return Err(e);
        }

        let size = sink.commit().await.at(AssemblyStage::Commit)?;
        if size != job.total_size {
            self.discard_object(job).await;
            return Err(AppError::storage(format!(
                "Assembled {size} bytes, expected {}",
                job.total_size
            )))
            .at(AssemblyStage::Commit);
        }

        let size = i64::try_from(size)
            .map_err(|_| AppError::validation("File too large"))
            .at(AssemblyStage::Finalize)?;
        match self
            .repos
            .files
            .complete_upload(job.file_id, size, job.options.max_views, job.options.deletes_at)
            .await
        {
            Ok(file) => Ok(file),
            Err(e) => {
                self.discard_object(job).await;
                Err(e).at(AssemblyStage::Finalize)
            }
        }
    }

    async fn fold(
        &self,
        job: &AssemblyJob,
        progress: &IncompleteFile,
        sink: &mut dyn AssemblySink,
        fragments: &[zipline_storage::ChunkFragment],
    ) -> Result<(), AssemblyError> {
        for fragment in fragments {
            let data = self
                .chunk_store
                .read_fragment(fragment)
                .await
                .at(AssemblyStage::Fold)?;
            sink.write_at(fragment.start, data)
                .await
                .at(AssemblyStage::Fold)?;
            self.chunk_store
                .delete_fragment(fragment)
                .await
                .at(AssemblyStage::Fold)?;
            let progress = self
                .repos
                .incomplete_files
                .record_chunk(progress.id)
                .await
                .at(AssemblyStage::Fold)?;
            tracing::trace!(
                identifier = %job.identifier,
                folded = progress.chunks_complete,
                total = progress.chunks_total,
                "Folded fragment"
            );
        }
        Ok(())
    }

    async fn discard_object(&self, job: &AssemblyJob) {
        if let Err(e) = self.storage.delete(&job.file_name).await {
            tracing::warn!(name = %job.file_name, error = %e, "Failed to delete assembled object");
        }
    }

    async fn mark(&self, progress: &IncompleteFile, status: IncompleteFileStatus) {
        match self.repos.incomplete_files.set_status(progress.id, status).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                id = %progress.id,
                status = %status,
                "Incomplete file was already terminal"
            ),
            Err(e) => tracing::error!(
                id = %progress.id,
                status = %status,
                error = %e,
                "Failed to update incomplete file status"
            ),
        }
    }

    async fn notify(&self, job: &AssemblyJob, file: &FileRecord) {
        let username = match self.repos.users.find_by_id(job.user_id).await {
            Ok(Some(user)) => user.username,
            Ok(None) => String::new(),
            Err(e) => {
                tracing::warn!(user_id = %job.user_id, error = %e, "Failed to load uploader");
                String::new()
            }
        };

        let event = UploadCompleted {
            file_id: file.id,
            file_name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            size: job.total_size,
            user_id: job.user_id,
            username,
            chunked: true,
            links: UploadLinks {
                raw: job.raw_url(),
                returned: job.response_url.clone(),
            },
            completed_at: Utc::now(),
        };
        self.notifier.on_upload(&event).await;
    }
}

#[async_trait]
impl JobHandler for AssemblyHandler {
    async fn execute(&self, job: AssemblyJob) {
        tracing::info!(
            identifier = %job.identifier,
            file_id = %job.file_id,
            chunks = job.expected_chunks,
            size = job.total_size,
            "Assembling upload"
        );
        match self.assemble(&job).await {
            Ok(file) => tracing::info!(
                identifier = %job.identifier,
                file_id = %file.id,
                name = %file.name,
                size = file.size,
                "Assembly complete"
            ),
            Err(e) => tracing::error!(
                identifier = %job.identifier,
                file_id = %job.file_id,
                stage = %e.stage,
                error = %e.source,
                "Assembly failed"
            ),
        }
    }
}
