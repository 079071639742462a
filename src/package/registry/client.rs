//! HTTP registry client.
//!
//! Talks to a package registry service over JSON:
//!
//! ```text
//! GET  /api/v1/packages/{ref}/{variant}         -> {"url": ..., "metaUrl": ...}
//! POST /api/v1/packages                         <- {"packageRefs", "variant", "url", "metaUrl"}
//! GET  /api/v1/packages?name=..&variant=..      -> {"urls": [...]}
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Request, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Registry;
use crate::error::{Error, Result};
use crate::url::ContentUrl;

/// Maximum allowed HTTP response body size (10 MiB).
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

pub struct HttpRegistry {
    client: Client,
    base_url: String,
    /// `<base_url>/api/v1/packages`
    packages: Url,
    writable: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    url: Option<ContentUrl>,
    #[serde(default)]
    meta_url: Option<ContentUrl>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishRequest<'a> {
    package_refs: &'a [String],
    variant: &'a str,
    url: &'a ContentUrl,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta_url: Option<&'a ContentUrl>,
}

#[derive(Deserialize)]
struct PublishResponse {
    #[serde(default)]
    receipts: Vec<String>,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    urls: Vec<ContentUrl>,
}

impl HttpRegistry {
    /// Create a new registry client.
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("cask/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let base_url = url.trim_end_matches('/').to_string();
        let mut packages = Url::parse(&base_url)
            .map_err(|e| Error::InvalidInput(format!("registry url '{}': {}", base_url, e)))?;
        packages
            .path_segments_mut()
            .map_err(|_| Error::InvalidInput(format!("registry url '{}' has no path", base_url)))?
            .pop_if_empty()
            .extend(["api", "v1", "packages"]);
        Ok(Self {
            client,
            base_url,
            packages,
            writable: true,
        })
    }

    /// Lookups only; `publish` fails with `Unwritable`.
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    /// `packages/{ref}/{variant}`, each part a single encoded path segment.
    fn lookup_url(&self, package_ref: &str, variant: &str) -> Url {
        let mut url = self.packages.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(package_ref).push(variant);
        }
        url
    }

    fn list_request(
        &self,
        name_filter: Option<&str>,
        variant_filter: Option<&str>,
    ) -> Result<Request> {
        let mut params = Vec::new();
        if let Some(name) = name_filter {
            params.push(("name", name));
        }
        if let Some(variant) = variant_filter {
            params.push(("variant", variant));
        }
        Ok(self
            .client
            .get(self.packages.clone())
            .query(&params)
            .build()?)
    }

    async fn lookup(&self, package_ref: &str, variant: &str) -> Result<Option<LookupResponse>> {
        let response = self
            .client
            .get(self.lookup_url(package_ref, variant))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = self.body(response, "lookup").await?;
        let found: LookupResponse = serde_json::from_slice(&body)?;
        Ok(Some(found))
    }

    async fn body(&self, response: reqwest::Response, what: &str) -> Result<Vec<u8>> {
        let status = response.status();
        if let Some(len) = response.content_length() {
            if len as usize > MAX_RESPONSE_SIZE {
                return Err(Error::InvalidInput(format!(
                    "{} response too large: {} bytes exceeds limit of {}",
                    what, len, MAX_RESPONSE_SIZE
                )));
            }
        }
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(Error::Unsupported(format!(
                "{} failed ({}): {}",
                what,
                status,
                String::from_utf8_lossy(&bytes)
            )));
        }
        if bytes.len() > MAX_RESPONSE_SIZE {
            return Err(Error::InvalidInput(format!(
                "{} response too large: exceeds limit of {} bytes",
                what, MAX_RESPONSE_SIZE
            )));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    fn label(&self) -> String {
        format!("registry at {}", self.base_url)
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    async fn get_url(&self, package_ref: &str, variant: &str) -> Result<Option<ContentUrl>> {
        Ok(self
            .lookup(package_ref, variant)
            .await?
            .and_then(|found| found.url))
    }

    async fn get_meta_url(
        &self,
        package_ref: &str,
        variant: &str,
    ) -> Result<Option<ContentUrl>> {
        Ok(self
            .lookup(package_ref, variant)
            .await?
            .and_then(|found| found.meta_url))
    }

    async fn publish(
        &self,
        package_refs: &[String],
        variant: &str,
        url: &ContentUrl,
        meta_url: Option<&ContentUrl>,
    ) -> Result<Vec<String>> {
        if !self.writable {
            return Err(Error::Unwritable(self.label()));
        }
        let request = PublishRequest {
            package_refs,
            variant,
            url,
            meta_url,
        };
        let response = self
            .client
            .post(self.packages.clone())
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let body = self.body(response, "publish").await.map_err(|e| match e {
            Error::Unsupported(msg) if status.is_client_error() => Error::Unwritable(msg),
            other => other,
        })?;
        let published: PublishResponse = if body.is_empty() {
            PublishResponse {
                receipts: Vec::new(),
            }
        } else {
            serde_json::from_slice(&body)?
        };
        debug!(
            registry = %self.base_url,
            variant,
            url = %url,
            refs = package_refs.len(),
            "published"
        );
        Ok(published.receipts)
    }

    async fn get_all_urls(
        &self,
        name_filter: Option<&str>,
        variant_filter: Option<&str>,
    ) -> Result<BTreeSet<ContentUrl>> {
        let request = self.list_request(name_filter, variant_filter)?;
        let response = self.client.execute(request).await?;
        let body = self.body(response, "list").await?;
        let listed: ListResponse = serde_json::from_slice(&body)?;
        Ok(listed.urls.into_iter().collect())
    }
}
