//! File-backed registry: one small tag file per `(ref, variant)`.
//!
//! Layout:
//! ```text
//! <data_dir>/tags/
//! ├── <name>_<version>_<variant>.txt        manifest URL
//! └── <name>_<version>_<variant>.txt.meta   meta URL (optional)
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{ref_name, Registry};
use crate::error::{Error, Result};
use crate::loader::write_atomic;
use crate::url::ContentUrl;

const TAG_EXT: &str = ".txt";
const META_EXT: &str = ".txt.meta";

pub struct LocalRegistry {
    dir: PathBuf,
}

impl LocalRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Tag file for a `name:version` ref. A ref without a version is tagged
    /// as `latest`. Parts that could leave the tag directory are rejected.
    pub fn tag_path(&self, package_ref: &str, variant: &str) -> Result<PathBuf> {
        let (name, version) = package_ref
            .split_once(':')
            .unwrap_or((package_ref, crate::reference::DEFAULT_VERSION));
        for part in [name, version, variant] {
            if part.is_empty() || part.contains(['/', '\\', '\0']) {
                return Err(Error::InvalidInput(format!(
                    "'{}' / '{}' cannot name a tag file",
                    package_ref, variant
                )));
            }
        }
        Ok(self
            .dir
            .join(format!("{}_{}_{}{}", name, version, variant, TAG_EXT)))
    }

    fn meta_path(&self, package_ref: &str, variant: &str) -> Result<PathBuf> {
        let mut path = self.tag_path(package_ref, variant)?.into_os_string();
        path.push(".meta");
        Ok(PathBuf::from(path))
    }

    async fn read_tag(path: &Path) -> Result<Option<ContentUrl>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => ContentUrl::parse(contents.trim())
                .map(Some)
                .map_err(|e| Error::malformed(path.display(), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Split a tag file name into its `<name>_<version>_<variant>` stem.
fn tag_stem(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(META_EXT)
        .or_else(|| file_name.strip_suffix(TAG_EXT))
}

#[async_trait]
impl Registry for LocalRegistry {
    fn label(&self) -> String {
        format!("local registry at {}", self.dir.display())
    }

    async fn get_url(&self, package_ref: &str, variant: &str) -> Result<Option<ContentUrl>> {
        Self::read_tag(&self.tag_path(package_ref, variant)?).await
    }

    async fn get_meta_url(
        &self,
        package_ref: &str,
        variant: &str,
    ) -> Result<Option<ContentUrl>> {
        Self::read_tag(&self.meta_path(package_ref, variant)?).await
    }

    async fn publish(
        &self,
        package_refs: &[String],
        variant: &str,
        url: &ContentUrl,
        meta_url: Option<&ContentUrl>,
    ) -> Result<Vec<String>> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut receipts = Vec::new();
        for package_ref in package_refs {
            let tag = self.tag_path(package_ref, variant)?;
            write_atomic(&tag, url.as_str().as_bytes()).await?;
            if let Some(meta_url) = meta_url {
                write_atomic(&self.meta_path(package_ref, variant)?, meta_url.as_str().as_bytes())
                    .await?;
            }
            debug!(tag = %tag.display(), url = %url, "wrote tag");
            receipts.push(tag.display().to_string());
        }
        Ok(receipts)
    }

    async fn get_all_urls(
        &self,
        name_filter: Option<&str>,
        variant_filter: Option<&str>,
    ) -> Result<BTreeSet<ContentUrl>> {
        let mut urls = BTreeSet::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(urls),
            Err(e) => return Err(e.into()),
        };
        let name_prefix = name_filter.map(|name| format!("{}_", ref_name(name)));
        let variant_suffix = variant_filter.map(|variant| format!("_{}", variant));

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = tag_stem(&file_name) else {
                continue;
            };
            if let Some(prefix) = &name_prefix {
                if !stem.starts_with(prefix.as_str()) {
                    continue;
                }
            }
            if let Some(suffix) = &variant_suffix {
                if !stem.ends_with(suffix.as_str()) {
                    continue;
                }
            }
            if let Some(url) = Self::read_tag(&entry.path()).await? {
                urls.insert(url);
            }
        }
        Ok(urls)
    }
}
