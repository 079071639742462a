use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{ref_name, Registry};
use crate::error::{Error, Result};
use crate::url::ContentUrl;

#[derive(Clone)]
struct Entry {
    url: ContentUrl,
    meta_url: Option<ContentUrl>,
}

/// In-process registry keyed by `(name:version, variant)`.
pub struct MemoryRegistry {
    name: String,
    entries: RwLock<BTreeMap<(String, String), Entry>>,
    publishes: AtomicUsize,
    read_only: bool,
}

impl MemoryRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(BTreeMap::new()),
            publishes: AtomicUsize::new(0),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Number of refs written through `publish`.
    pub fn publishes(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    /// Seed a mapping directly, bypassing the read-only flag.
    pub fn insert(
        &self,
        package_ref: &str,
        variant: &str,
        url: ContentUrl,
        meta_url: Option<ContentUrl>,
    ) -> Result<()> {
        self.entries
            .write()
            .map_err(|_| Error::Internal("memory registry lock poisoned".into()))?
            .insert(
                (package_ref.to_string(), variant.to_string()),
                Entry { url, meta_url },
            );
        Ok(())
    }

    fn entry(&self, package_ref: &str, variant: &str) -> Result<Option<Entry>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::Internal("memory registry lock poisoned".into()))?;
        Ok(entries
            .get(&(package_ref.to_string(), variant.to_string()))
            .cloned())
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    fn label(&self) -> String {
        format!("memory registry ({})", self.name)
    }

    fn is_writable(&self) -> bool {
        !self.read_only
    }

    async fn get_url(&self, package_ref: &str, variant: &str) -> Result<Option<ContentUrl>> {
        Ok(self.entry(package_ref, variant)?.map(|e| e.url))
    }

    async fn get_meta_url(
        &self,
        package_ref: &str,
        variant: &str,
    ) -> Result<Option<ContentUrl>> {
        Ok(self.entry(package_ref, variant)?.and_then(|e| e.meta_url))
    }

    async fn publish(
        &self,
        package_refs: &[String],
        variant: &str,
        url: &ContentUrl,
        meta_url: Option<&ContentUrl>,
    ) -> Result<Vec<String>> {
        if self.read_only {
            return Err(Error::Unwritable(self.label()));
        }
        let mut receipts = Vec::new();
        for package_ref in package_refs {
            self.insert(package_ref, variant, url.clone(), meta_url.cloned())?;
            self.publishes.fetch_add(1, Ordering::SeqCst);
            receipts.push(format!("{}:{}/{}", self.name, package_ref, variant));
        }
        Ok(receipts)
    }

    async fn get_all_urls(
        &self,
        name_filter: Option<&str>,
        variant_filter: Option<&str>,
    ) -> Result<BTreeSet<ContentUrl>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::Internal("memory registry lock poisoned".into()))?;
        let mut urls = BTreeSet::new();
        for ((package_ref, variant), entry) in entries.iter() {
            if name_filter.is_some_and(|name| ref_name(package_ref) != ref_name(name)) {
                continue;
            }
            if variant_filter.is_some_and(|v| v != variant) {
                continue;
            }
            urls.insert(entry.url.clone());
            if let Some(meta_url) = &entry.meta_url {
                urls.insert(meta_url.clone());
            }
        }
        Ok(urls)
    }
}
