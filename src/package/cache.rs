//! Read-through cache in front of a slow (remote) loader.
//!
//! Cache entries are keyed by the BLAKE3 digest of the URL, not the URL
//! itself, so case-insensitive filesystems never fold two identifiers onto
//! one file.
//!
//! Layout:
//! ```text
//! <data_dir>/ipfs_cache/
//! └── <blake3(url)_hex>.json
//! ```
//!
//! Entries are append-only: a URL names immutable content, so once written an
//! entry is never modified.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::loader::{write_atomic, Loader};
use crate::url::ContentUrl;

/// Statistics about the cache directory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached blobs.
    pub entries: usize,
    /// Total size in bytes.
    pub total_bytes: u64,
}

/// A loader that serves reads from a local directory before delegating.
///
/// `writer` is optional. Read-only mirrors have none: `put` then only
/// populates the local cache.
pub struct CachingLoader {
    reader: Arc<dyn Loader>,
    writer: Option<Arc<dyn Loader>>,
    dir: PathBuf,
}

impl CachingLoader {
    pub fn new(reader: Arc<dyn Loader>, writer: Option<Arc<dyn Loader>>, dir: PathBuf) -> Self {
        Self {
            reader,
            writer,
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache file for a URL.
    pub fn cache_path(&self, url: &ContentUrl) -> PathBuf {
        let key = ContentHash::digest(url.as_str().as_bytes());
        self.dir.join(format!("{}.json", key.to_hex()))
    }

    async fn store(&self, url: &ContentUrl, blob: &[u8]) -> Result<()> {
        let path = self.cache_path(url);
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        write_atomic(&path, blob).await
    }

    /// The backend that names new content: the writer when there is one.
    fn backend(&self) -> &Arc<dyn Loader> {
        self.writer.as_ref().unwrap_or(&self.reader)
    }

    /// Count cached entries and their size.
    pub async fn cache_stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|e| e == "json") {
                stats.entries += 1;
                stats.total_bytes += entry.metadata().await?.len();
            }
        }
        Ok(stats)
    }

    /// Clear the entire cache.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Loader for CachingLoader {
    fn scheme(&self) -> &str {
        self.reader.scheme()
    }

    fn label(&self) -> String {
        format!("{} (cached at {})", self.reader.label(), self.dir.display())
    }

    async fn read(&self, url: &ContentUrl) -> Result<Vec<u8>> {
        let path = self.cache_path(url);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(url = %url, "cache hit");
                return Ok(bytes);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let blob = self.reader.read(url).await?;
        if let Err(e) = self.store(url, &blob).await {
            warn!(url = %url, error = %e, "could not populate cache");
        }
        Ok(blob)
    }

    async fn content_url(&self, blob: &[u8]) -> Result<ContentUrl> {
        self.backend().content_url(blob).await
    }

    /// Cache `blob` locally and forward it to the writer, if any. A blob
    /// already in the cache is neither rewritten nor forwarded again.
    async fn put(&self, blob: Vec<u8>) -> Result<ContentUrl> {
        let url = self.content_url(&blob).await?;
        if tokio::fs::try_exists(self.cache_path(&url)).await? {
            debug!(url = %url, "blob already cached");
            return Ok(url);
        }

        if let Some(writer) = &self.writer {
            let written = writer.put(blob.clone()).await?;
            if written != url {
                return Err(Error::InvariantViolation(format!(
                    "{} stored {} but the computed url was {}",
                    writer.label(),
                    written,
                    url
                )));
            }
        }
        self.store(&url, &blob).await?;
        Ok(url)
    }

    async fn remove(&self, url: &ContentUrl) -> Result<()> {
        let path = self.cache_path(url);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match &self.writer {
            Some(writer) => writer.remove(url).await,
            None => self.reader.remove(url).await,
        }
    }

    async fn list(&self) -> Result<Vec<ContentUrl>> {
        self.reader.list().await
    }
}
