//! Package references: `name[:version][@preset]`.
//!
//! A reference names a package independently of the chain it was deployed
//! to. Combined with a chain id it yields the registry variant
//! `<chainId>-<preset>`, which selects one concrete deployment.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub const DEFAULT_VERSION: &str = "latest";
pub const DEFAULT_PRESET: &str = "main";

/// A parsed, normalized package reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageReference {
    name: String,
    version: String,
    preset: String,
}

impl PackageReference {
    /// Parse a reference string.
    ///
    /// Accepts `name`, `name:version`, `name@preset`, `name:version@preset`,
    /// and the legacy `name:version#preset` form.
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = reference.trim();
        let (rest, preset) = match trimmed.split_once('@').or_else(|| trimmed.split_once('#')) {
            Some((rest, preset)) => (rest, Some(preset)),
            None => (trimmed, None),
        };
        let (name, version) = match rest.split_once(':') {
            Some((name, version)) => (name, Some(version)),
            None => (rest, None),
        };

        if !is_valid_name(name) {
            return Err(invalid(
                "name must match [a-z0-9][a-z0-9-]*[a-z0-9] (lowercase, at least two characters)",
            ));
        }
        if let Some(version) = version {
            if !is_valid_token(version) {
                return Err(invalid(
                    "version must be non-empty without whitespace, separators or path characters",
                ));
            }
        }
        if let Some(preset) = preset {
            if !is_valid_token(preset) {
                return Err(invalid(
                    "preset must be non-empty without whitespace, separators or path characters",
                ));
            }
        }

        Ok(Self {
            name: name.to_string(),
            version: version.unwrap_or(DEFAULT_VERSION).to_string(),
            preset: preset.unwrap_or(DEFAULT_PRESET).to_string(),
        })
    }

    /// Build a reference from separate parts, applying the defaults.
    pub fn from_parts(name: &str, version: Option<&str>, preset: Option<&str>) -> Result<Self> {
        let mut reference = name.to_string();
        if let Some(version) = version {
            reference.push(':');
            reference.push_str(version);
        }
        if let Some(preset) = preset {
            reference.push('@');
            reference.push_str(preset);
        }
        Self::parse(&reference)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn preset(&self) -> &str {
        &self.preset
    }

    /// `name:version`, the key registries publish under.
    pub fn base_package_ref(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }

    /// `name:version@preset`.
    pub fn full_package_ref(&self) -> String {
        format!("{}:{}@{}", self.name, self.version, self.preset)
    }

    /// `<chainId>-<preset>`.
    pub fn variant(&self, chain_id: u64) -> String {
        format!("{}-{}", chain_id, self.preset)
    }

    /// The same package pinned to `latest`.
    pub fn latest(&self) -> Self {
        Self {
            name: self.name.clone(),
            version: DEFAULT_VERSION.to_string(),
            preset: self.preset.clone(),
        }
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.name, self.version, self.preset)
    }
}

impl FromStr for PackageReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split a variant string back into `(chain_id, preset)`.
pub fn parse_variant(variant: &str) -> Option<(u64, &str)> {
    let (chain, preset) = variant.split_once('-')?;
    Some((chain.parse().ok()?, preset))
}

fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() < 2 {
        return false;
    }
    let edge = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    edge(bytes[0])
        && edge(bytes[bytes.len() - 1])
        && bytes.iter().all(|&b| edge(b) || b == b'-')
}

/// Versions and presets end up in tag file names, so path separators and
/// dot-only tokens are out.
fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && token.chars().any(|c| c != '.')
        && !token.chars().any(|c| {
            c.is_whitespace() || c.is_control() || matches!(c, '@' | '#' | ':' | '/' | '\\')
        })
}
