//! Reading and writing the feed file on disk.
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Feeds larger than this are refused rather than loaded into memory.
const MAX_FEED_SIZE: u64 = 10 * 1024 * 1024; // 10MB

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read feed file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write feed file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Feed file '{path}' is {size} bytes (max {max} bytes)")]
    TooLarge { path: PathBuf, size: u64, max: u64 },
}

/// The persisted feed document.
#[derive(Debug, Clone)]
pub struct FeedStore {
    path: PathBuf,
}

impl FeedStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current document. A missing file is `Ok(None)`.
    pub async fn read(&self) -> Result<Option<String>, StoreError> {
        // SEC-014: Size check before reading the whole document into memory
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.len() > MAX_FEED_SIZE => {
                return Err(StoreError::TooLarge {
                    path: self.path.clone(),
                    size: meta.len(),
                    max: MAX_FEED_SIZE,
                });
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No existing feed file");
                return Ok(None);
            }
            Err(e) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        }

        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                tracing::debug!(path = %self.path.display(), bytes = content.len(), "Loaded existing feed");
                Ok(Some(content))
            }
            // Deleted between metadata and read
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Read {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    /// Replaces the document atomically: write a temp file beside the
    /// target, sync it, then rename over the target.
    pub fn write(&self, document: &str) -> Result<(), StoreError> {
        use std::time::{SystemTime, UNIX_EPOCH};

        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        // SEC-009: Randomized temp filename plus create_new, so a pre-planted
        // file or symlink at the temp path is never followed or truncated
        let random_suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let temp_path = self.path.with_extension(format!("tmp.{:016x}", random_suffix));

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .map_err(write_err)?;

        let result = file
            .write_all(document.as_bytes())
            .and_then(|()| file.sync_all());
        drop(file);

        if let Err(e) = result.and_then(|()| std::fs::rename(&temp_path, &self.path)) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(write_err(e));
        }

        tracing::debug!(path = %self.path.display(), bytes = document.len(), "Feed written");
        Ok(())
    }
}
