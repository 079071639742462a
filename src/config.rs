//! Runtime settings.
//!
//! Settings are resolved once, from explicit values first and environment
//! variables second, and then passed down. Nothing here is memoized.
//!
//! Directory layout under `data_dir`:
//!
//! ```text
//! blobs/        local file loader, <hash>.json
//! ipfs_cache/   caching loader in front of IPFS, <blake3(url)>.json
//! tags/         local registry, <name>_<version>_<variant>.txt
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::cache::CachingLoader;
use crate::error::{Error, Result};
use crate::loader::{FileLoader, IpfsLoader, Loader};
use crate::registry::{FallbackRegistry, HttpRegistry, LocalRegistry, Registry};
use crate::storage::Storage;
use crate::url::{FILE_SCHEME, IPFS_SCHEME};

pub const ENV_DIRECTORY: &str = "CASK_DIRECTORY";
pub const ENV_IPFS_URL: &str = "CASK_IPFS_URL";
pub const ENV_PUBLISH_IPFS_URL: &str = "CASK_PUBLISH_IPFS_URL";
pub const ENV_REGISTRY_URL: &str = "CASK_REGISTRY_URL";
pub const ENV_REGISTRY_PRIORITY: &str = "CASK_REGISTRY_PRIORITY";
pub const ENV_WRITE_SCHEME: &str = "CASK_WRITE_SCHEME";

/// Which registry answers first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryPriority {
    #[default]
    Local,
    Remote,
}

impl FromStr for RegistryPriority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(Error::InvalidInput(format!(
                "registry priority must be 'local' or 'remote', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for RegistryPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Remote => "remote",
        })
    }
}

/// Unresolved settings: every field optional. Explicit values (CLI flags)
/// are layered over the environment with [`SettingsSource::or`].
#[derive(Clone, Debug, Default)]
pub struct SettingsSource {
    pub data_dir: Option<PathBuf>,
    pub ipfs_url: Option<String>,
    pub publish_ipfs_url: Option<String>,
    pub registry_url: Option<String>,
    pub registry_priority: Option<String>,
    pub write_scheme: Option<String>,
}

impl SettingsSource {
    /// Read the `CASK_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            data_dir: get(ENV_DIRECTORY).map(PathBuf::from),
            ipfs_url: get(ENV_IPFS_URL),
            publish_ipfs_url: get(ENV_PUBLISH_IPFS_URL),
            registry_url: get(ENV_REGISTRY_URL),
            registry_priority: get(ENV_REGISTRY_PRIORITY),
            write_scheme: get(ENV_WRITE_SCHEME),
        }
    }

    /// Fill fields unset in `self` from `fallback`.
    pub fn or(self, fallback: SettingsSource) -> Self {
        Self {
            data_dir: self.data_dir.or(fallback.data_dir),
            ipfs_url: self.ipfs_url.or(fallback.ipfs_url),
            publish_ipfs_url: self.publish_ipfs_url.or(fallback.publish_ipfs_url),
            registry_url: self.registry_url.or(fallback.registry_url),
            registry_priority: self.registry_priority.or(fallback.registry_priority),
            write_scheme: self.write_scheme.or(fallback.write_scheme),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub ipfs_url: Option<String>,
    pub publish_ipfs_url: Option<String>,
    pub registry_url: Option<String>,
    pub registry_priority: RegistryPriority,
    pub write_scheme: String,
}

impl Settings {
    /// Apply defaults and validate.
    ///
    /// Data directory priority:
    /// 1. explicit value or `$CASK_DIRECTORY`
    /// 2. `~/.local/share/cask/`
    pub fn resolve(source: SettingsSource) -> Result<Self> {
        let data_dir = match source.data_dir {
            Some(dir) => dir,
            None => default_data_dir().ok_or_else(|| {
                Error::InvalidInput(format!(
                    "cannot locate a data directory: set ${} or $HOME",
                    ENV_DIRECTORY
                ))
            })?,
        };

        let registry_priority = match source.registry_priority {
            Some(priority) => priority.parse()?,
            None => RegistryPriority::default(),
        };

        let write_scheme = match source.write_scheme {
            Some(scheme) => scheme.trim().to_ascii_lowercase(),
            None if source.publish_ipfs_url.is_some() => IPFS_SCHEME.to_string(),
            None => FILE_SCHEME.to_string(),
        };
        match write_scheme.as_str() {
            FILE_SCHEME => {}
            IPFS_SCHEME => {
                if source.ipfs_url.is_none() && source.publish_ipfs_url.is_none() {
                    return Err(Error::InvalidInput(format!(
                        "write scheme 'ipfs' needs ${} or ${}",
                        ENV_IPFS_URL, ENV_PUBLISH_IPFS_URL
                    )));
                }
            }
            other => {
                return Err(Error::InvalidInput(format!(
                    "unknown write scheme '{}' (expected 'file' or 'ipfs')",
                    other
                )))
            }
        }

        Ok(Self {
            data_dir,
            ipfs_url: source.ipfs_url,
            publish_ipfs_url: source.publish_ipfs_url,
            registry_url: source.registry_url,
            registry_priority,
            write_scheme,
        })
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    pub fn ipfs_cache_dir(&self) -> PathBuf {
        self.data_dir.join("ipfs_cache")
    }

    pub fn tags_dir(&self) -> PathBuf {
        self.data_dir.join("tags")
    }

    /// Build the storage facade these settings describe.
    pub fn storage(&self) -> Result<Storage> {
        let mut storage = Storage::new(self.registry()?)
            .with_loader(Arc::new(FileLoader::new(self.blobs_dir())))
            .with_write_scheme(Some(&self.write_scheme));

        let read_url = self.ipfs_url.as_ref().or(self.publish_ipfs_url.as_ref());
        if let Some(read_url) = read_url {
            let reader: Arc<dyn Loader> = Arc::new(IpfsLoader::new(read_url)?);
            let writer: Option<Arc<dyn Loader>> = match &self.publish_ipfs_url {
                Some(url) => Some(Arc::new(IpfsLoader::new(url)?)),
                None => None,
            };
            debug!(
                read = %read_url,
                writable = writer.is_some(),
                "ipfs loader configured"
            );
            storage = storage.with_loader(Arc::new(CachingLoader::new(
                reader,
                writer,
                self.ipfs_cache_dir(),
            )));
        }
        Ok(storage)
    }

    fn registry(&self) -> Result<Arc<dyn Registry>> {
        let local: Arc<dyn Registry> = Arc::new(LocalRegistry::new(self.tags_dir()));
        let Some(url) = &self.registry_url else {
            return Ok(Arc::new(FallbackRegistry::new(vec![local])));
        };
        let remote: Arc<dyn Registry> = Arc::new(HttpRegistry::new(url)?);
        let members = match self.registry_priority {
            RegistryPriority::Local => vec![local, remote],
            RegistryPriority::Remote => vec![remote, local],
        };
        Ok(Arc::new(FallbackRegistry::new(members)))
    }
}

/// `~/.local/share/cask`, when a home directory is known.
pub fn default_data_dir() -> Option<PathBuf> {
    dirs_home().map(|home| home.join(".local").join("share").join("cask"))
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}
