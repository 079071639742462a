use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::Loader;
use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::url::{ContentUrl, FILE_SCHEME};

/// In-process backend. Used for tests and as a stand-in for remote stores.
///
/// URLs are `<scheme>://<blake3-hex>` (or the `.json` file form for the
/// `file` scheme). Counts reads and the writes that actually hit the map.
pub struct MemoryLoader {
    scheme: String,
    objects: RwLock<BTreeMap<ContentUrl, Vec<u8>>>,
    writes: AtomicUsize,
    reads: AtomicUsize,
    read_only: bool,
    removable: bool,
}

impl MemoryLoader {
    pub fn new(scheme: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            objects: RwLock::new(BTreeMap::new()),
            writes: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            read_only: false,
            removable: true,
        }
    }

    /// A mirror that rejects writes.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// A backend that cannot delete (shared content networks).
    pub fn without_remove(mut self) -> Self {
        self.removable = false;
        self
    }

    /// Number of writes that stored new bytes.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of `read` calls served, hits and misses alike.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Seed an object directly, bypassing the read-only flag.
    pub fn insert(&self, blob: Vec<u8>) -> Result<ContentUrl> {
        let url = self.url_for(&blob)?;
        self.objects
            .write()
            .map_err(|_| Error::Internal("memory store lock poisoned".into()))?
            .insert(url.clone(), blob);
        Ok(url)
    }

    pub fn contains(&self, url: &ContentUrl) -> bool {
        self.objects
            .read()
            .map(|objects| objects.contains_key(url))
            .unwrap_or(false)
    }

    fn url_for(&self, blob: &[u8]) -> Result<ContentUrl> {
        let hash = ContentHash::digest(blob);
        if self.scheme == FILE_SCHEME {
            Ok(ContentUrl::file(&hash))
        } else {
            ContentUrl::parse(&format!("{}://{}", self.scheme, hash.to_hex()))
        }
    }
}

#[async_trait]
impl Loader for MemoryLoader {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn label(&self) -> String {
        format!("memory store ({})", self.scheme)
    }

    async fn read(&self, url: &ContentUrl) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let objects = self
            .objects
            .read()
            .map_err(|_| Error::Internal("memory store lock poisoned".into()))?;
        objects
            .get(url)
            .cloned()
            .ok_or_else(|| Error::NotFound(url.to_string()))
    }

    async fn content_url(&self, blob: &[u8]) -> Result<ContentUrl> {
        self.url_for(blob)
    }

    async fn put(&self, blob: Vec<u8>) -> Result<ContentUrl> {
        if self.read_only {
            return Err(Error::Unwritable(self.label()));
        }
        let url = self.url_for(&blob)?;
        let mut objects = self
            .objects
            .write()
            .map_err(|_| Error::Internal("memory store lock poisoned".into()))?;
        if !objects.contains_key(&url) {
            objects.insert(url.clone(), blob);
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(url)
    }

    async fn remove(&self, url: &ContentUrl) -> Result<()> {
        if !self.removable {
            return Err(Error::Unsupported(format!(
                "{} cannot remove {}",
                self.label(),
                url
            )));
        }
        self.objects
            .write()
            .map_err(|_| Error::Internal("memory store lock poisoned".into()))?
            .remove(url);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ContentUrl>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| Error::Internal("memory store lock poisoned".into()))?;
        Ok(objects.keys().cloned().collect())
    }
}
