//! Local blob store: a flat directory of `<blake3-hex>.json` files.
//!
//! No nesting and no index file; `list()` is a directory scan.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{write_atomic, Loader};
use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::url::{ContentUrl, FILE_SCHEME};

pub struct FileLoader {
    dir: PathBuf,
}

impl FileLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, url: &ContentUrl) -> Result<PathBuf> {
        let hash = ContentHash::from_hex(url.id())
            .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;
        Ok(self.dir.join(format!("{}.json", hash.to_hex())))
    }
}

#[async_trait]
impl Loader for FileLoader {
    fn scheme(&self) -> &str {
        FILE_SCHEME
    }

    fn label(&self) -> String {
        format!("file store at {}", self.dir.display())
    }

    async fn read(&self, url: &ContentUrl) -> Result<Vec<u8>> {
        let path = self.path_for(url)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(url.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn content_url(&self, blob: &[u8]) -> Result<ContentUrl> {
        Ok(ContentUrl::file(&ContentHash::digest(blob)))
    }

    async fn put(&self, blob: Vec<u8>) -> Result<ContentUrl> {
        let hash = ContentHash::digest(&blob);
        let url = ContentUrl::file(&hash);
        let path = self.dir.join(format!("{}.json", hash.to_hex()));

        // Same digest means same bytes: nothing to do.
        if tokio::fs::try_exists(&path).await? {
            debug!(url = %url, "blob already stored");
            return Ok(url);
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        write_atomic(&path, &blob).await?;
        debug!(url = %url, bytes = blob.len(), "stored blob");
        Ok(url)
    }

    async fn remove(&self, url: &ContentUrl) -> Result<()> {
        let path = self.path_for(url)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<ContentUrl>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut urls = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(hash) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(ContentHash::from_hex)
            else {
                continue;
            };
            urls.push(ContentUrl::file(&hash));
        }
        urls.sort();
        Ok(urls)
    }
}
