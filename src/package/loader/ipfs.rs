//! IPFS loader speaking the Kubo HTTP RPC API (`/api/v0/...`).
//!
//! The node computes the CID, so `put` is idempotent by construction: adding
//! the same bytes twice pins the same CID.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::Loader;
use crate::error::{Error, Result};
use crate::url::{ContentUrl, IPFS_SCHEME};

/// Maximum accepted blob size (64 MiB).
const MAX_BLOB_SIZE: usize = 64 * 1024 * 1024;

pub struct IpfsLoader {
    client: Client,
    api_url: String,
}

#[derive(Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Deserialize)]
struct PinLsResponse {
    #[serde(rename = "Keys", default)]
    keys: BTreeMap<String, serde_json::Value>,
}

impl IpfsLoader {
    pub fn new(api_url: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .user_agent(concat!("cask/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v0/{}", self.api_url, path)
    }

    /// `add` the blob and return its CID. With `only_hash` the node computes
    /// the CID without storing or pinning anything.
    async fn add(&self, blob: Vec<u8>, only_hash: bool) -> Result<ContentUrl> {
        let len = blob.len();
        let form = Form::new().part("file", Part::bytes(blob).file_name("blob.json"));
        let response = self
            .client
            .post(self.endpoint("add"))
            .query(&add_params(only_hash))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Unwritable(format!(
                "ipfs add failed ({}): {}",
                status, body
            )));
        }

        let added: AddResponse = response.json().await?;
        let url = ContentUrl::ipfs(&added.hash)?;
        debug!(url = %url, bytes = len, only_hash, "ipfs add");
        Ok(url)
    }
}

/// Query for `add`. Both modes use CIDv0 so a hashed CID matches the stored one.
fn add_params(only_hash: bool) -> [(&'static str, &'static str); 3] {
    let only_hash = if only_hash { "true" } else { "false" };
    [
        ("pin", "true"),
        ("cid-version", "0"),
        ("only-hash", only_hash),
    ]
}

#[async_trait]
impl Loader for IpfsLoader {
    fn scheme(&self) -> &str {
        IPFS_SCHEME
    }

    fn label(&self) -> String {
        format!("ipfs node at {}", self.api_url)
    }

    async fn read(&self, url: &ContentUrl) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(self.endpoint("cat"))
            .query(&[("arg", url.id())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Kubo answers a missing block with 500 + "not found".
            if status == StatusCode::NOT_FOUND || body.contains("not found") {
                return Err(Error::NotFound(url.to_string()));
            }
            return Err(Error::Unsupported(format!(
                "ipfs cat {} failed ({}): {}",
                url, status, body
            )));
        }

        let bytes = response.bytes().await?;
        if bytes.len() > MAX_BLOB_SIZE {
            return Err(Error::malformed(
                url,
                format!("blob exceeds {} bytes", MAX_BLOB_SIZE),
            ));
        }
        Ok(bytes.to_vec())
    }

    async fn content_url(&self, blob: &[u8]) -> Result<ContentUrl> {
        self.add(blob.to_vec(), true).await
    }

    async fn put(&self, blob: Vec<u8>) -> Result<ContentUrl> {
        self.add(blob, false).await
    }

    async fn remove(&self, url: &ContentUrl) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint("pin/rm"))
            .query(&[("arg", url.id())])
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if body.contains("not pinned") {
            return Ok(());
        }
        Err(Error::Unsupported(format!(
            "ipfs pin rm {} failed ({}): {}",
            url, status, body
        )))
    }

    async fn list(&self) -> Result<Vec<ContentUrl>> {
        let response = self
            .client
            .post(self.endpoint("pin/ls"))
            .query(&[("type", "recursive")])
            .send()
            .await?
            .error_for_status()?;
        let pins: PinLsResponse = response.json().await?;
        pins.keys.keys().map(|cid| ContentUrl::ipfs(cid)).collect()
    }
}
