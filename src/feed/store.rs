use chrono::Utc;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use super::rss::{read_feed, write_feed, ChannelInfo, RssError};
use crate::advisory::FeedDocument;

/// SEC-014: Persisted feeds larger than this are treated as corrupt.
const MAX_FEED_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Errors from reading or publishing persisted feeds.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    /// The persisted feed exists but cannot be read back
    #[error("Persisted feed is corrupt: {0}")]
    CorruptFeed(String),
    /// The feed could not be serialized
    #[error(transparent)]
    Encode(#[from] RssError),
    /// SEC-008: Slug would escape the output directory
    #[error("Invalid region slug: {0:?}")]
    InvalidSlug(String),
}

impl StoreError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Checks that a region slug is safe to use as a file name: ASCII
/// alphanumerics, `-` and `_` only.
pub fn validate_slug(slug: &str) -> Result<(), StoreError> {
    let valid = !slug.is_empty()
        && slug
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidSlug(slug.to_string()))
    }
}

/// Publishing sink and persisted state: one `<slug>.rss` per region inside
/// an output directory.
#[derive(Debug, Clone)]
pub struct FeedStore {
    dir: PathBuf,
}

impl FeedStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, region_slug: &str) -> Result<PathBuf, StoreError> {
        validate_slug(region_slug)?;
        Ok(self.dir.join(format!("{region_slug}.rss")))
    }

    /// Loads the persisted feed for a region.
    ///
    /// A missing file is a first run and yields an empty document.
    ///
    /// # Errors
    ///
    /// - [`StoreError::CorruptFeed`] when the file exists but is oversized or
    ///   unparseable
    /// - [`StoreError::Io`] when the file cannot be read
    pub async fn load(&self, region_slug: &str) -> Result<FeedDocument, StoreError> {
        let path = self.path_for(region_slug)?;

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.len() > MAX_FEED_FILE_SIZE => {
                return Err(StoreError::CorruptFeed(format!(
                    "'{}' is {} bytes (max {} bytes)",
                    path.display(),
                    meta.len(),
                    MAX_FEED_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(region = %region_slug, path = %path.display(), "No persisted feed, starting empty");
                return Ok(FeedDocument::empty(region_slug));
            }
            Err(e) => {
                return Err(StoreError::io(
                    format!("Failed to stat '{}'", path.display()),
                    e,
                ))
            }
            Ok(_) => {}
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FeedDocument::empty(region_slug));
            }
            Err(e) => {
                return Err(StoreError::io(
                    format!("Failed to read '{}'", path.display()),
                    e,
                ))
            }
        };

        read_feed(&bytes, region_slug).map_err(|e| StoreError::CorruptFeed(e.to_string()))
    }

    /// Moves an unreadable persisted feed aside as
    /// `<slug>.rss.corrupt.<timestamp>` so the next publish does not destroy
    /// it. Returns the new path, or `None` when there was nothing to move.
    pub async fn quarantine(&self, region_slug: &str) -> Result<Option<PathBuf>, StoreError> {
        let path = self.path_for(region_slug)?;
        let target = self.dir.join(format!(
            "{region_slug}.rss.corrupt.{}",
            Utc::now().format("%Y%m%d_%H%M%S")
        ));
        match tokio::fs::rename(&path, &target).await {
            Ok(()) => Ok(Some(target)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(
                format!(
                    "Failed to move '{}' to '{}'",
                    path.display(),
                    target.display()
                ),
                e,
            )),
        }
    }

    /// Writes the feed as RSS, replacing the previous file atomically.
    pub async fn publish(
        &self,
        doc: &FeedDocument,
        channel: &ChannelInfo,
    ) -> Result<PathBuf, StoreError> {
        let path = self.path_for(&doc.region_slug)?;
        let bytes = write_feed(doc, channel)?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            StoreError::io(
                format!("Failed to create output directory '{}'", self.dir.display()),
                e,
            )
        })?;
        atomic_write(&path, &bytes).await?;

        tracing::debug!(
            region = %doc.region_slug,
            path = %path.display(),
            items = doc.len(),
            "Published feed"
        );
        Ok(path)
    }
}

/// Write-to-temp-then-rename so readers never see a partial feed.
async fn atomic_write(dst: &Path, content: &[u8]) -> Result<(), StoreError> {
    // SEC-009: Randomized temp filename so the path cannot be predicted and
    // pre-created as a symlink.
    let random_suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = dst.with_extension(format!("rss.tmp.{:016x}", random_suffix));

    let result = write_then_rename(&temp_path, dst, content).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&temp_path).await;
    }
    result
}

async fn write_then_rename(temp_path: &Path, dst: &Path, content: &[u8]) -> Result<(), StoreError> {
    let mut temp_file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true) // Fails if the file exists (prevents symlink race)
        .open(temp_path)
        .await
        .map_err(|e| {
            StoreError::io(
                format!(
                    "Failed to create temporary file '{}': check directory permissions or disk space",
                    temp_path.display()
                ),
                e,
            )
        })?;

    temp_file.write_all(content).await.map_err(|e| {
        StoreError::io(
            format!(
                "Failed to write to temporary file '{}': disk may be full",
                temp_path.display()
            ),
            e,
        )
    })?;

    temp_file.sync_all().await.map_err(|e| {
        StoreError::io(
            format!("Failed to sync temporary file '{}' to disk", temp_path.display()),
            e,
        )
    })?;
    drop(temp_file);

    // On Windows, rename fails if destination exists, so remove it first
    #[cfg(windows)]
    if tokio::fs::try_exists(dst).await.unwrap_or(false) {
        tokio::fs::remove_file(dst).await.map_err(|e| {
            StoreError::io(
                format!("Failed to remove existing '{}' before atomic replace", dst.display()),
                e,
            )
        })?;
    }

    tokio::fs::rename(temp_path, dst).await.map_err(|e| {
        StoreError::io(
            format!(
                "Failed to rename '{}' to '{}': check permissions",
                temp_path.display(),
                dst.display()
            ),
            e,
        )
    })
}
