//! Pending file registration at last-chunk time.

use std::sync::Arc;

use chrono::Utc;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use zipline_core::config::FilesConfig;
use zipline_core::error::{AppError, ErrorKind};
use zipline_core::result::AppResult;
use zipline_core::traits::StorageProvider;
use zipline_database::Repositories;
use zipline_entity::file::{CreateFileRecord, FileRecord};
use zipline_entity::upload::UploadOptions;
use zipline_entity::user::User;
use zipline_storage::mime;

use super::headers::PartialChunk;
use super::naming;
use crate::password::PasswordHasher;

/// Characters escaped in a URL path segment (everything but unreserved).
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Generated names are retried this many times on a unique-name conflict.
const MAX_NAME_ATTEMPTS: usize = 3;

const OCTET_STREAM: &str = "application/octet-stream";

/// One file in an upload response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFileEntry {
    /// File record ID.
    pub id: Uuid,
    /// MIME type.
    #[serde(rename = "type")]
    pub mime_type: String,
    /// URL the file will be served at.
    pub url: String,
    /// Whether the content is still being assembled.
    pub pending: bool,
}

/// A freshly created pending file.
#[derive(Debug, Clone)]
pub struct Registration {
    /// The `size == 0` record.
    pub file: FileRecord,
    /// Response entry for the client.
    pub entry: UploadedFileEntry,
}

/// Applies upload policy and creates the pending [`FileRecord`].
#[derive(Clone)]
pub struct MetadataRegistrar {
    repos: Repositories,
    storage: Arc<dyn StorageProvider>,
    hasher: PasswordHasher,
    config: FilesConfig,
}

impl std::fmt::Debug for MetadataRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataRegistrar")
            .field("route", &self.config.route)
            .finish_non_exhaustive()
    }
}

impl MetadataRegistrar {
    /// Create a registrar.
    pub fn new(
        repos: Repositories,
        storage: Arc<dyn StorageProvider>,
        hasher: PasswordHasher,
        config: FilesConfig,
    ) -> Self {
        Self {
            repos,
            storage,
            hasher,
            config,
        }
    }

    /// Extension the stored file will carry, with leading dot.
    pub fn extension_for(chunk: &PartialChunk, options: &UploadOptions) -> String {
        options
            .override_extension
            .clone()
            .unwrap_or_else(|| naming::extension_of(&chunk.filename))
    }

    /// Check the extension denylist and folder policy and resolve the owner.
    ///
    /// Runs on the first chunk to fail fast and again at registration.
    pub async fn check_policy(
        &self,
        uploader: Option<&User>,
        chunk: &PartialChunk,
        options: &UploadOptions,
    ) -> AppResult<Uuid> {
        let extension = Self::extension_for(chunk, options);
        if self.is_extension_disabled(&extension) {
            return Err(AppError::validation(format!(
                "File extension {extension} is not allowed"
            )));
        }

        let uploader_id = uploader.map(|u| u.id);
        match options.folder {
            Some(folder_id) => {
                let folder = self
                    .repos
                    .folders
                    .find_by_id(folder_id)
                    .await?
                    .ok_or_else(|| AppError::not_found("Folder does not exist"))?;
                if !folder.accepts_upload_from(uploader_id) {
                    return Err(AppError::authorization("Folder is not open"));
                }
                Ok(uploader_id.unwrap_or(folder.user_id))
            }
            None => uploader_id.ok_or_else(|| {
                AppError::authentication("You must be logged in or upload to an open folder")
            }),
        }
    }

    fn is_extension_disabled(&self, extension: &str) -> bool {
        if extension.is_empty() {
            return false;
        }
        self.config.disabled_extensions.iter().any(|disabled| {
            let disabled = disabled.trim();
            let disabled = disabled.strip_prefix('.').unwrap_or(disabled);
            extension[1..].eq_ignore_ascii_case(disabled)
        })
    }

    fn mime_type_for(&self, chunk: &PartialChunk, extension: &str) -> String {
        if self.config.assume_mimetypes && chunk.content_type == OCTET_STREAM {
            if let Some(guessed) = mime::guess_from_name(&format!("file{extension}")) {
                return guessed.to_string();
            }
        }
        chunk.content_type.clone()
    }

    /// Apply the overwrite policy to a client-chosen base name.
    async fn claim_name(&self, base: &str, options: &UploadOptions) -> AppResult<()> {
        if options.overwrite && !self.config.file_overwrite {
            return Err(AppError::validation("File overwriting is disabled"));
        }

        let Some(existing) = self.repos.files.find_by_name_prefix(base).await? else {
            return Ok(());
        };
        if !options.overwrite {
            return Err(AppError::conflict(format!(
                "A file with the name \"{base}*\" already exists"
            )));
        }

        info!(file_id = %existing.id, name = %existing.name, "Overwriting existing file");
        self.repos.files.delete(existing.id).await?;
        if let Err(e) = self.storage.delete(&existing.name).await {
            warn!(name = %existing.name, error = %e, "Failed to delete overwritten content");
        }
        Ok(())
    }

    /// Public URL for a stored name.
    pub fn file_url(&self, domain: &str, name: &str) -> String {
        let route = self.config.route.trim_matches('/');
        let encoded = utf8_percent_encode(name, PATH_SEGMENT);
        if route.is_empty() {
            format!("{domain}/{encoded}")
        } else {
            format!("{domain}/{route}/{encoded}")
        }
    }

    /// Create the pending file for a completed chunk sequence.
    ///
    /// `domain` is the `scheme://host` the returned URL is built on.
    pub async fn create_pending_file(
        &self,
        uploader: Option<&User>,
        chunk: &PartialChunk,
        options: &UploadOptions,
        domain: &str,
    ) -> AppResult<Registration> {
        let owner = self.check_policy(uploader, chunk, options).await?;
        let extension = Self::extension_for(chunk, options);
        let mime_type = self.mime_type_for(chunk, &extension);

        let password = options
            .password
            .as_deref()
            .map(|p| self.hasher.hash_password(p))
            .transpose()?;

        let chosen = match &options.override_filename {
            Some(name) => Some(name.clone()),
            None if naming::is_deterministic(options.format) => Some(
                naming::generate_base_name(options.format, &chunk.filename, &self.config, Utc::now()),
            ),
            None => None,
        };
        if let Some(base) = &chosen {
            self.claim_name(base, options).await?;
        }

        let attempts = if chosen.is_some() { 1 } else { MAX_NAME_ATTEMPTS };
        for attempt in 1..=attempts {
            let base = match &chosen {
                Some(base) => base.clone(),
                None => naming::generate_base_name(
                    options.format,
                    &chunk.filename,
                    &self.config,
                    Utc::now(),
                ),
            };
            let name = format!("{base}{extension}");
            if !naming::is_valid_name(&name) {
                return Err(AppError::validation(format!("Invalid file name: {name}")));
            }

            let data = CreateFileRecord {
                name,
                original_name: options.add_original_name.then(|| chunk.filename.clone()),
                size: 0,
                mime_type: mime_type.clone(),
                password: password.clone(),
                max_views: None,
                deletes_at: None,
                folder_id: options.folder,
                user_id: owner,
            };

            match self.repos.files.create(&data).await {
                Ok(file) => {
                    info!(file_id = %file.id, name = %file.name, owner = %owner, "Created pending file");
                    let entry = UploadedFileEntry {
                        id: file.id,
                        mime_type: file.mime_type.clone(),
                        url: self.file_url(domain, &file.name),
                        pending: true,
                    };
                    return Ok(Registration { file, entry });
                }
                Err(e) if e.kind == ErrorKind::Conflict && attempt < attempts => {
                    warn!(name = %data.name, attempt, "Generated name taken, retrying");
                }
                Err(e) if e.kind == ErrorKind::Conflict => {
                    return Err(AppError::conflict(format!(
                        "A file with the name \"{}\" already exists",
                        data.name
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::conflict("Could not reserve a unique file name"))
    }

    /// Roll back a registration whose assembly could not be scheduled.
    pub async fn discard(&self, file: &FileRecord) -> AppResult<()> {
        self.repos.files.delete(file.id).await?;
        Ok(())
    }
}
