//! Registries: `(package ref, variant) → content URL` resolution.
//!
//! A registry maps `name:version` plus a `<chainId>-<preset>` variant to the
//! URL of a deployment manifest and, optionally, a metadata URL. Several
//! registries are composed with [`FallbackRegistry`]: lookups stop at the
//! first member that knows the package, while publication and enumeration
//! reach every member.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::url::ContentUrl;

mod client;
mod local;
mod memory;

pub use client::HttpRegistry;
pub use local::LocalRegistry;
pub use memory::MemoryRegistry;


/// A name/variant resolution and publication service.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Human-readable description for logs.
    fn label(&self) -> String;

    /// Whether `publish` can succeed at all.
    fn is_writable(&self) -> bool {
        true
    }

    /// URL of the manifest published for `package_ref` (`name:version`).
    async fn get_url(&self, package_ref: &str, variant: &str) -> Result<Option<ContentUrl>>;

    /// Metadata URL published alongside the manifest.
    async fn get_meta_url(&self, package_ref: &str, variant: &str)
        -> Result<Option<ContentUrl>>;

    /// Point every ref in `package_refs` at `url`. Returns one receipt per
    /// write performed.
    async fn publish(
        &self,
        package_refs: &[String],
        variant: &str,
        url: &ContentUrl,
        meta_url: Option<&ContentUrl>,
    ) -> Result<Vec<String>>;

    /// Every URL (manifest and meta) currently mapped, restricted to
    /// packages named `name_filter` and variants equal to `variant_filter`.
    async fn get_all_urls(
        &self,
        name_filter: Option<&str>,
        variant_filter: Option<&str>,
    ) -> Result<BTreeSet<ContentUrl>>;
}

/// Package name part of a `name:version` ref.
pub(crate) fn ref_name(package_ref: &str) -> &str {
    package_ref
        .split_once(':')
        .map_or(package_ref, |(name, _)| name)
}

// ─── Fallback Registry ─────────────────────────────────────────────

/// Priority-ordered chain of registries.
///
/// Reads are read-through: member 0 is asked first and the first non-empty
/// answer wins, which lets a local registry shadow a remote one. A member
/// that errors is logged and skipped; the error surfaces only when no later
/// member answers.
pub struct FallbackRegistry {
    registries: Vec<Arc<dyn Registry>>,
}

impl FallbackRegistry {
    pub fn new(registries: Vec<Arc<dyn Registry>>) -> Self {
        Self { registries }
    }

    pub fn members(&self) -> &[Arc<dyn Registry>] {
        &self.registries
    }

    /// Publish to an explicit subset of members, by index.
    pub async fn publish_to(
        &self,
        members: &[usize],
        package_refs: &[String],
        variant: &str,
        url: &ContentUrl,
        meta_url: Option<&ContentUrl>,
    ) -> Result<Vec<String>> {
        let mut receipts = Vec::new();
        for &idx in members {
            let registry = self.registries.get(idx).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "registry index {} out of range ({} configured)",
                    idx,
                    self.registries.len()
                ))
            })?;
            receipts.extend(registry.publish(package_refs, variant, url, meta_url).await?);
        }
        Ok(receipts)
    }

    async fn first_hit(
        &self,
        package_ref: &str,
        variant: &str,
        lookup: Lookup,
    ) -> Result<Option<ContentUrl>> {
        let mut first_error = None;
        for registry in &self.registries {
            let answer = match lookup {
                Lookup::Url => registry.get_url(package_ref, variant).await,
                Lookup::MetaUrl => registry.get_meta_url(package_ref, variant).await,
            };
            match answer {
                Ok(Some(url)) => {
                    debug!(
                        registry = %registry.label(),
                        package = package_ref,
                        variant,
                        url = %url,
                        "resolved {:?}",
                        lookup
                    );
                    return Ok(Some(url));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        registry = %registry.label(),
                        package = package_ref,
                        variant,
                        error = %e,
                        "registry lookup failed, trying next"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Lookup {
    Url,
    MetaUrl,
}

#[async_trait]
impl Registry for FallbackRegistry {
    fn label(&self) -> String {
        let labels: Vec<String> = self.registries.iter().map(|r| r.label()).collect();
        format!("fallback[{}]", labels.join(", "))
    }

    fn is_writable(&self) -> bool {
        self.registries.iter().any(|r| r.is_writable())
    }

    async fn get_url(&self, package_ref: &str, variant: &str) -> Result<Option<ContentUrl>> {
        self.first_hit(package_ref, variant, Lookup::Url).await
    }

    async fn get_meta_url(
        &self,
        package_ref: &str,
        variant: &str,
    ) -> Result<Option<ContentUrl>> {
        self.first_hit(package_ref, variant, Lookup::MetaUrl).await
    }

    async fn publish(
        &self,
        package_refs: &[String],
        variant: &str,
        url: &ContentUrl,
        meta_url: Option<&ContentUrl>,
    ) -> Result<Vec<String>> {
        let writable: Vec<usize> = self
            .registries
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_writable())
            .map(|(idx, _)| idx)
            .collect();
        if writable.is_empty() {
            return Err(Error::Unwritable(self.label()));
        }
        self.publish_to(&writable, package_refs, variant, url, meta_url)
            .await
    }

    async fn get_all_urls(
        &self,
        name_filter: Option<&str>,
        variant_filter: Option<&str>,
    ) -> Result<BTreeSet<ContentUrl>> {
        let mut all = BTreeSet::new();
        for registry in &self.registries {
            all.extend(registry.get_all_urls(name_filter, variant_filter).await?);
        }
        Ok(all)
    }
}
