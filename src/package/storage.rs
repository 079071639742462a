//! Storage facade: one registry chain plus a scheme → loader map.
//!
//! Routing is purely on the URL scheme. `read_deploy` goes through the
//! registry first; `read_blob`/`put_blob` are direct, for callers that
//! already hold a URL (walking imports, pruning).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::loader::Loader;
use crate::manifest::DeploymentInfo;
use crate::reference::PackageReference;
use crate::registry::Registry;
use crate::url::ContentUrl;

/// Chain id of the local development network. Packages built locally are
/// looked up there when the requested chain has no record.
pub const LOCAL_CHAIN_ID: u64 = 13370;

/// Serialize to the byte form every loader stores: compact JSON with object
/// keys in sorted order, so equal values always hash to the same URL.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&value)?)
}

pub struct Storage {
    registry: Arc<dyn Registry>,
    loaders: BTreeMap<String, Arc<dyn Loader>>,
    write_scheme: Option<String>,
}

impl Storage {
    /// A read-only facade over `registry`. Add loaders with
    /// [`Storage::with_loader`].
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            loaders: BTreeMap::new(),
            write_scheme: None,
        }
    }

    /// Route `loader.scheme()` URLs to `loader`. A later loader for the same
    /// scheme replaces the earlier one.
    pub fn with_loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loaders.insert(loader.scheme().to_string(), loader);
        self
    }

    /// Scheme new blobs are written with. `None` makes the facade read-only.
    pub fn with_write_scheme(mut self, scheme: Option<&str>) -> Self {
        self.write_scheme = scheme.map(str::to_string);
        self
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn loaders(&self) -> impl Iterator<Item = &Arc<dyn Loader>> {
        self.loaders.values()
    }

    pub fn write_scheme(&self) -> Option<&str> {
        self.write_scheme.as_deref()
    }

    fn loader_for(&self, url: &ContentUrl) -> Result<&Arc<dyn Loader>> {
        self.loaders.get(url.scheme()).ok_or_else(|| {
            Error::Unsupported(format!("no loader configured for scheme '{}'", url.scheme()))
        })
    }

    fn write_loader(&self) -> Result<&Arc<dyn Loader>> {
        let scheme = self
            .write_scheme
            .as_deref()
            .ok_or_else(|| Error::Unwritable("no write scheme configured".into()))?;
        self.loaders.get(scheme).ok_or_else(|| {
            Error::Unwritable(format!("write scheme '{}' has no loader", scheme))
        })
    }

    // ─── Direct Blob Access ────────────────────────────────────────

    /// Raw bytes at `url`.
    pub async fn read_raw(&self, url: &ContentUrl) -> Result<Vec<u8>> {
        self.loader_for(url)?.read(url).await
    }

    /// Read and decode the JSON blob at `url`. A decode failure is
    /// `Malformed`.
    pub async fn read_blob<T: DeserializeOwned>(&self, url: &ContentUrl) -> Result<T> {
        let bytes = self.read_raw(url).await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::malformed(url, e))
    }

    /// Write `value` through the write-scheme loader.
    pub async fn put_blob<T: Serialize + Sync>(&self, value: &T) -> Result<ContentUrl> {
        let loader = self.write_loader()?;
        let bytes = canonical_bytes(value)?;
        let url = loader.put(bytes).await?;
        debug!(url = %url, loader = %loader.label(), "stored blob");
        Ok(url)
    }

    /// Best-effort delete. Backends that cannot delete are logged and
    /// skipped; any other failure propagates.
    pub async fn delete_blob(&self, url: &ContentUrl) -> Result<()> {
        let loader = self.loader_for(url)?;
        match loader.remove(url).await {
            Ok(()) => {
                debug!(url = %url, "deleted blob");
                Ok(())
            }
            Err(Error::Unsupported(reason)) => {
                warn!(url = %url, reason = %reason, "loader cannot delete, skipping");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // ─── Deployments ───────────────────────────────────────────────

    /// Registry lookup for the manifest URL of `package` on `chain_id`.
    pub async fn resolve_url(
        &self,
        package: &PackageReference,
        chain_id: u64,
    ) -> Result<Option<ContentUrl>> {
        self.registry
            .get_url(&package.base_package_ref(), &package.variant(chain_id))
            .await
    }

    /// Registry lookup for the meta URL published next to the manifest.
    pub async fn resolve_meta_url(
        &self,
        package: &PackageReference,
        chain_id: u64,
    ) -> Result<Option<ContentUrl>> {
        self.registry
            .get_meta_url(&package.base_package_ref(), &package.variant(chain_id))
            .await
    }

    /// The deployment `package` points at on `chain_id`, or `None` when no
    /// registry knows it. A registered blob that fails to decode is an
    /// error.
    pub async fn read_deploy(
        &self,
        package: &PackageReference,
        chain_id: u64,
    ) -> Result<Option<DeploymentInfo>> {
        Ok(self
            .read_deploy_at(package, chain_id)
            .await?
            .map(|(_, info)| info))
    }

    /// Like [`Storage::read_deploy`], also returning the manifest URL.
    pub async fn read_deploy_at(
        &self,
        package: &PackageReference,
        chain_id: u64,
    ) -> Result<Option<(ContentUrl, DeploymentInfo)>> {
        let Some(url) = self.resolve_url(package, chain_id).await? else {
            debug!(package = %package, chain_id, "no registry mapping");
            return Ok(None);
        };
        let info = self.read_blob(&url).await?;
        Ok(Some((url, info)))
    }

    /// `read_deploy`, retrying on the local development chain when the
    /// requested chain has no record. Returns the chain id that answered.
    pub async fn read_deploy_with_fallback(
        &self,
        package: &PackageReference,
        chain_id: u64,
    ) -> Result<(u64, DeploymentInfo)> {
        if let Some(info) = self.read_deploy(package, chain_id).await? {
            return Ok((chain_id, info));
        }
        if chain_id != LOCAL_CHAIN_ID {
            if let Some(info) = self.read_deploy(package, LOCAL_CHAIN_ID).await? {
                info!(
                    package = %package,
                    chain_id,
                    fallback = LOCAL_CHAIN_ID,
                    "package found on local chain"
                );
                return Ok((LOCAL_CHAIN_ID, info));
            }
        }
        Err(Error::PackageNotFound {
            package: package.full_package_ref(),
            chain_id,
        })
    }

    /// Write a deployment manifest. `None` means this facade is not
    /// writable; the caller decides whether that is fatal.
    pub async fn put_deploy(&self, info: &DeploymentInfo) -> Result<Option<ContentUrl>> {
        if self.write_scheme.is_none() {
            return Ok(None);
        }
        match self.put_blob(info).await {
            Ok(url) => Ok(Some(url)),
            Err(Error::Unwritable(reason)) => {
                warn!(reason = %reason, "deployment not written");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Point both `name:version` and `name:latest` at `url` on `chain_id`.
    pub async fn publish(
        &self,
        package: &PackageReference,
        chain_id: u64,
        url: &ContentUrl,
        meta_url: Option<&ContentUrl>,
    ) -> Result<Vec<String>> {
        let mut refs = vec![package.base_package_ref()];
        let latest = package.latest().base_package_ref();
        if !refs.contains(&latest) {
            refs.push(latest);
        }
        let variant = package.variant(chain_id);
        let receipts = self.registry.publish(&refs, &variant, url, meta_url).await?;
        info!(package = %package, variant = %variant, url = %url, "published");
        Ok(receipts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;
    use crate::registry::MemoryRegistry;
    use crate::testing::{deployment, memory_storage};
    use crate::url::FILE_SCHEME;

    #[test]
    fn test_canonical_bytes_sorts_keys() {
        let a = serde_json::json!({"b": 1, "a": {"d": 2, "c": 3}});
        assert_eq!(
            canonical_bytes(&a).unwrap(),
            br#"{"a":{"c":3,"d":2},"b":1}"#.to_vec()
        );
    }

    #[tokio::test]
    async fn test_put_then_read_deploy() {
        let (storage, loader, _) = memory_storage();
        let info = deployment("token", 10);
        let package = PackageReference::parse("token:1.0.0").unwrap();

        let url = storage.put_deploy(&info).await.unwrap().unwrap();
        assert_eq!(url.scheme(), FILE_SCHEME);
        // Same content, same URL, one write.
        assert_eq!(storage.put_deploy(&info).await.unwrap(), Some(url.clone()));
        assert_eq!(loader.writes(), 1);

        assert!(storage.read_deploy(&package, 13370).await.unwrap().is_none());
        storage.publish(&package, 13370, &url, None).await.unwrap();
        assert_eq!(storage.read_deploy(&package, 13370).await.unwrap(), Some(info.clone()));
        // The latest tag follows the versioned one.
        let latest = PackageReference::parse("token").unwrap();
        assert_eq!(storage.read_deploy(&latest, 13370).await.unwrap(), Some(info));
        assert!(storage.read_deploy(&package, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_deploy_malformed_blob_is_fatal() {
        let (storage, loader, registry) = memory_storage();
        let url = loader.insert(b"{\"not\":\"a deployment\"}".to_vec()).unwrap();
        registry.insert("junk:latest", "1-main", url, None).unwrap();

        let package = PackageReference::parse("junk").unwrap();
        let err = storage.read_deploy(&package, 1).await.unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_read_deploy_with_fallback_uses_local_chain() {
        let (storage, _, _) = memory_storage();
        let info = deployment("token", 10);
        let package = PackageReference::parse("token:1.0.0").unwrap();
        let url = storage.put_deploy(&info).await.unwrap().unwrap();
        storage
            .publish(&package, LOCAL_CHAIN_ID, &url, None)
            .await
            .unwrap();

        let (chain_id, found) = storage.read_deploy_with_fallback(&package, 1).await.unwrap();
        assert_eq!(chain_id, LOCAL_CHAIN_ID);
        assert_eq!(found, info);

        let missing = PackageReference::parse("other").unwrap();
        let err = storage.read_deploy_with_fallback(&missing, 1).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "package other:latest@main not found on chain 1");
    }

    #[tokio::test]
    async fn test_read_only_storage_put_deploy_is_none() {
        let loader = Arc::new(MemoryLoader::new(FILE_SCHEME));
        let storage = Storage::new(Arc::new(MemoryRegistry::new("ro"))).with_loader(loader);
        assert_eq!(storage.put_deploy(&deployment("token", 1)).await.unwrap(), None);
        assert!(matches!(
            storage.put_blob(&1u32).await.unwrap_err(),
            Error::Unwritable(_)
        ));
    }

    #[tokio::test]
    async fn test_read_only_loader_put_deploy_is_none() {
        let loader = Arc::new(MemoryLoader::new(FILE_SCHEME).read_only());
        let storage = Storage::new(Arc::new(MemoryRegistry::new("r")))
            .with_loader(loader)
            .with_write_scheme(Some(FILE_SCHEME));
        assert_eq!(storage.put_deploy(&deployment("token", 1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scheme_routing() {
        let file = Arc::new(MemoryLoader::new(FILE_SCHEME));
        let ipfs = Arc::new(MemoryLoader::new("ipfs"));
        let storage = Storage::new(Arc::new(MemoryRegistry::new("r")))
            .with_loader(file.clone())
            .with_loader(ipfs.clone())
            .with_write_scheme(Some("ipfs"));

        let url = storage.put_blob(&serde_json::json!({"k": "v"})).await.unwrap();
        assert_eq!(url.scheme(), "ipfs");
        assert!(ipfs.contains(&url));
        assert_eq!(file.writes(), 0);

        let value: serde_json::Value = storage.read_blob(&url).await.unwrap();
        assert_eq!(value["k"], "v");

        let unknown = ContentUrl::parse("ar://abc").unwrap();
        assert!(matches!(
            storage.read_raw(&unknown).await.unwrap_err(),
            Error::Unsupported(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_blob_skips_unsupported_backends() {
        let ipfs = Arc::new(MemoryLoader::new("ipfs").without_remove());
        let storage = Storage::new(Arc::new(MemoryRegistry::new("r")))
            .with_loader(ipfs.clone())
            .with_write_scheme(Some("ipfs"));
        let url = storage.put_blob(&"blob").await.unwrap();
        storage.delete_blob(&url).await.unwrap();
        assert!(ipfs.contains(&url));
    }
}
