//! Temp-directory fragment store.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use zipline_core::error::{AppError, ErrorKind};
use zipline_core::result::AppResult;

use super::fragment::{ChunkFragment, fragment_name, parse_fragment_name};

/// A fragment file as seen by a directory scan.
#[derive(Debug, Clone)]
pub struct FragmentEntry {
    /// Parsed fragment.
    pub fragment: ChunkFragment,
    /// Last modification time.
    pub modified: SystemTime,
}

/// Persists chunk bodies as one file per `(identifier, start, end)`.
///
/// Fragments are written to `.{name}.tmp` and renamed into place, so a
/// listed fragment is always complete.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    dir: PathBuf,
}

impl ChunkStore {
    /// Open (and create) the fragment directory.
    pub async fn new(dir: impl Into<PathBuf>) -> AppResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to create temp directory: {}", dir.display()),
                e,
            )
        })?;
        Ok(Self { dir })
    }

    /// The fragment directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn check_identifier(identifier: &str) -> AppResult<()> {
        if identifier.is_empty() || !identifier.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AppError::validation(format!(
                "Invalid upload identifier: {identifier}"
            )));
        }
        Ok(())
    }

    /// Persist the bytes `[start, end)` of upload `identifier`.
    ///
    /// Writing the same range again replaces the earlier fragment.
    pub async fn write(
        &self,
        identifier: &str,
        start: u64,
        end: u64,
        data: Bytes,
    ) -> AppResult<ChunkFragment> {
        Self::check_identifier(identifier)?;
        if end < start || end - start != data.len() as u64 {
            return Err(AppError::validation(format!(
                "Chunk body is {} bytes but range {start}-{end} is {} bytes",
                data.len(),
                end.saturating_sub(start)
            )));
        }

        let name = fragment_name(identifier, start, end);
        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!(".{name}.tmp"));

        let mut file = fs::File::create(&tmp).await.map_err(|e| {
            AppError::with_source(ErrorKind::Storage, format!("Failed to create {name}"), e)
        })?;
        let written = async {
            file.write_all(&data).await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to write {name}"),
                e,
            ));
        }

        fs::rename(&tmp, &path).await.map_err(|e| {
            AppError::with_source(ErrorKind::Storage, format!("Failed to persist {name}"), e)
        })?;

        debug!(identifier, start, end, "Wrote chunk fragment");
        Ok(ChunkFragment {
            identifier: identifier.to_string(),
            start,
            end,
            path,
        })
    }

    /// All fragment files in the directory.
    pub async fn scan(&self) -> AppResult<Vec<FragmentEntry>> {
        let mut dir = fs::read_dir(&self.dir).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to list {}", self.dir.display()),
                e,
            )
        })?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| {
            AppError::with_source(ErrorKind::Storage, "Failed to read directory entry", e)
        })? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some((identifier, start, end)) = parse_fragment_name(name) else {
                continue;
            };
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(t) => t,
                // Renamed or deleted between listing and stat.
                Err(_) => continue,
            };
            entries.push(FragmentEntry {
                fragment: ChunkFragment {
                    identifier: identifier.to_string(),
                    start,
                    end,
                    path: entry.path(),
                },
                modified,
            });
        }
        Ok(entries)
    }

    /// Fragments of one upload, sorted ascending by start offset.
    pub async fn list_fragments(&self, identifier: &str) -> AppResult<Vec<ChunkFragment>> {
        Self::check_identifier(identifier)?;
        let mut fragments: Vec<ChunkFragment> = self
            .scan()
            .await?
            .into_iter()
            .map(|e| e.fragment)
            .filter(|f| f.identifier == identifier)
            .collect();
        fragments.sort_by_key(|f| (f.start, f.end));
        Ok(fragments)
    }

    /// Read a fragment's bytes.
    pub async fn read_fragment(&self, fragment: &ChunkFragment) -> AppResult<Bytes> {
        let data = fs::read(&fragment.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::not_found(format!(
                    "Fragment {}-{} of {} is missing",
                    fragment.start, fragment.end, fragment.identifier
                ))
            } else {
                AppError::with_source(
                    ErrorKind::Storage,
                    format!("Failed to read fragment {}", fragment.path.display()),
                    e,
                )
            }
        })?;
        if data.len() as u64 != fragment.len() {
            return Err(AppError::storage(format!(
                "Fragment {} holds {} bytes, expected {}",
                fragment.path.display(),
                data.len(),
                fragment.len()
            )));
        }
        Ok(Bytes::from(data))
    }

    /// Delete one fragment. A missing fragment is not an error.
    pub async fn delete_fragment(&self, fragment: &ChunkFragment) -> AppResult<()> {
        match fs::remove_file(&fragment.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to delete fragment {}", fragment.path.display()),
                e,
            )),
        }
    }

    /// Best-effort removal of every fragment of `identifier`.
    ///
    /// Failures are logged and skipped. Returns the number removed.
    pub async fn delete_fragments(&self, identifier: &str) -> usize {
        let fragments = match self.list_fragments(identifier).await {
            Ok(f) => f,
            Err(e) => {
                warn!(identifier, error = %e, "Failed to list fragments for cleanup");
                return 0;
            }
        };

        let mut removed = 0;
        for fragment in &fragments {
            match self.delete_fragment(fragment).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(identifier, error = %e, "Failed to delete fragment"),
            }
        }
        if removed > 0 {
            debug!(identifier, removed, "Deleted chunk fragments");
        }
        removed
    }

    /// Identifiers that have at least one fragment on disk.
    pub async fn list_identifiers(&self) -> AppResult<Vec<String>> {
        let mut identifiers: Vec<String> = self
            .scan()
            .await?
            .into_iter()
            .map(|e| e.fragment.identifier)
            .collect();
        identifiers.sort();
        identifiers.dedup();
        Ok(identifiers)
    }
}
