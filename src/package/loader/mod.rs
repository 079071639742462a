//! Loaders: storage backends keyed by URL scheme.
//!
//! Every backend implements the same four operations. Blobs are opaque
//! bytes at this layer; the storage facade owns JSON encoding.
//!
//! Contract:
//! - `read` fails with `Error::NotFound` when the backend has no object for
//!   the identifier. It never returns a partial blob.
//! - `put` is idempotent: the same bytes always yield the same URL and an
//!   existing object is never written twice. `content_url` computes that URL
//!   without storing anything.
//! - `remove` is optional. Backends without delete support return
//!   `Error::Unsupported`, which callers treat as "skip", not "fail".

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::url::ContentUrl;

mod file;
mod ipfs;
mod memory;

pub use file::FileLoader;
pub use ipfs::IpfsLoader;
pub use memory::MemoryLoader;

#[cfg(test)]
mod tests;

/// A content-addressed storage backend.
#[async_trait]
pub trait Loader: Send + Sync {
    /// The URL scheme this loader serves.
    fn scheme(&self) -> &str;

    /// Human-readable backend description for logs.
    fn label(&self) -> String;

    /// Fetch the blob named by `url`.
    async fn read(&self, url: &ContentUrl) -> Result<Vec<u8>>;

    /// The URL `put` would return for `blob`. Stores nothing.
    async fn content_url(&self, blob: &[u8]) -> Result<ContentUrl>;

    /// Store a blob, returning its content URL.
    async fn put(&self, blob: Vec<u8>) -> Result<ContentUrl>;

    /// Delete the blob named by `url`.
    async fn remove(&self, url: &ContentUrl) -> Result<()> {
        Err(Error::Unsupported(format!(
            "{} cannot remove {}",
            self.label(),
            url
        )))
    }

    /// Every URL the backend can enumerate.
    async fn list(&self) -> Result<Vec<ContentUrl>>;
}

/// Write `bytes` to `path` through a temp file + rename so readers never see
/// a partially written blob.
pub(crate) async fn write_atomic(path: &std::path::Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
