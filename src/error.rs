//! Error types and result alias for the package store.
//!
//! Misses (`NotFound`, `PackageNotFound`) are recoverable: callers may fall
//! back to another chain id or report "not built yet". Everything the alter
//! engine raises as `InvariantViolation` is fatal and leaves no partial
//! publication behind.

/// The result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by loaders, registries, and the engines built on them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A loader or registry has no object for the requested key.
    #[error("not found: {0}")]
    NotFound(String),

    /// No registry maps the package to a URL on the given chain.
    #[error("package {package} not found on chain {chain_id}")]
    PackageNotFound {
        /// Full package reference that was looked up.
        package: String,
        /// Chain id the variant was derived from.
        chain_id: u64,
    },

    /// A write was attempted against a read-only loader or registry.
    #[error("not writable: {0}")]
    Unwritable(String),

    /// A blob was fetched but does not have the expected shape.
    #[error("malformed blob at {url}: {reason}")]
    Malformed {
        /// URL of the offending blob.
        url: String,
        /// Parse failure description.
        reason: String,
    },

    /// The alter engine could not keep the package tree consistent.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A prune package filter matched nothing in any registry.
    #[error("package filter '{filter}' matched no registered packages")]
    FilterYieldsEmpty {
        /// The filter that produced the empty keep set.
        filter: String,
    },

    /// A package reference string failed to parse.
    #[error("invalid package reference '{reference}': {reason}")]
    InvalidReference {
        /// The rejected input.
        reference: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A content URL failed to parse.
    #[error("invalid content url '{0}'")]
    InvalidUrl(String),

    /// Invalid caller input (bad address, unknown step, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The backend does not support the requested capability.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Should not happen in normal operation (poisoned lock, ...).
    #[error("internal error: {0}")]
    Internal(String),

    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Remote backend failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// True for recoverable lookup misses.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::PackageNotFound { .. })
    }

    /// Creates a malformed-blob error.
    #[must_use]
    pub fn malformed(url: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        Self::Malformed {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}
