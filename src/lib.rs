pub mod config;
pub mod error;
pub mod package;

// Re-exports: keep the storage core reachable as `cask::X`
pub use package::alter;
pub use package::cache;
pub use package::hash;
pub use package::loader;
pub use package::manifest;
pub use package::prune;
pub use package::reference;
pub use package::registry;
pub use package::resolve;
pub use package::storage;
pub use package::url;

#[cfg(test)]
pub(crate) use package::testing;

pub use config::{RegistryPriority, Settings, SettingsSource};
pub use error::{Error, Result};
pub use manifest::DeploymentInfo;
pub use reference::PackageReference;
pub use storage::Storage;
pub use url::ContentUrl;
