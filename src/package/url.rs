//! Content URLs: `<scheme>://<content identifier>`.
//!
//! The scheme routes a URL to a loader; the identifier names the content.
//! Two URLs are equal iff their identifiers are equal, so `ipfs://Qm..` read
//! back from a registry compares equal to the same CID written by a loader
//! regardless of how either side spelled the prefix.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::hash::ContentHash;

pub const FILE_SCHEME: &str = "file";
pub const IPFS_SCHEME: &str = "ipfs";

/// A scheme-prefixed content address.
#[derive(Clone)]
pub struct ContentUrl {
    raw: String,
    scheme_len: usize,
}

impl ContentUrl {
    /// Parse and normalize a URL string.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if let Some(cid) = url.strip_prefix("@ipfs:") {
            return Self::ipfs(cid);
        }
        if is_bare_cid(url) {
            return Self::ipfs(url);
        }
        let Some((scheme, id)) = url.split_once("://") else {
            return Err(Error::InvalidUrl(url.to_string()));
        };
        let scheme_ok = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.');
        if !scheme_ok || id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(Error::InvalidUrl(url.to_string()));
        }
        let scheme = scheme.to_ascii_lowercase();
        if scheme == IPFS_SCHEME {
            return Self::ipfs(id);
        }
        Ok(Self {
            scheme_len: scheme.len(),
            raw: format!("{}://{}", scheme, id),
        })
    }

    /// `ipfs://<cid>`.
    pub fn ipfs(cid: &str) -> Result<Self> {
        let cid = cid.trim();
        if cid.is_empty() || cid.chars().any(|c| !c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidUrl(format!("ipfs://{}", cid)));
        }
        Ok(Self {
            scheme_len: IPFS_SCHEME.len(),
            raw: format!("{}://{}", IPFS_SCHEME, cid),
        })
    }

    /// `file://<hash>.json`.
    pub fn file(hash: &ContentHash) -> Self {
        Self {
            scheme_len: FILE_SCHEME.len(),
            raw: format!("{}://{}.json", FILE_SCHEME, hash.to_hex()),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.raw[..self.scheme_len]
    }

    /// The part after `://`, without the `.json` suffix local files carry.
    pub fn id(&self) -> &str {
        let rest = &self.raw[self.scheme_len + 3..];
        if self.scheme() == FILE_SCHEME {
            rest.strip_suffix(".json").unwrap_or(rest)
        } else {
            rest
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// A bare CIDv0 (`Qm` + base58, 46 chars) or base32 CIDv1 (`bafy...`).
/// Short names such as `bafyapp` are package names, not CIDs.
fn is_bare_cid(s: &str) -> bool {
    const BASE58: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
    if s.starts_with("Qm") {
        return s.len() == 46 && s.chars().all(|c| BASE58.contains(c));
    }
    s.starts_with("bafy")
        && s.len() >= 50
        && s.chars().all(|c| matches!(c, 'a'..='z' | '2'..='7'))
}

impl PartialEq for ContentUrl {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ContentUrl {}

impl Hash for ContentUrl {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl PartialOrd for ContentUrl {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ContentUrl {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id().cmp(other.id())
    }
}

impl fmt::Display for ContentUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Debug for ContentUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentUrl({})", self.raw)
    }
}

impl std::str::FromStr for ContentUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ContentUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for ContentUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ContentUrl::parse(&raw).map_err(serde::de::Error::custom)
    }
}
