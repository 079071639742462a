//! Garbage collection of store content no registry can reach.
//!
//! [`Pruner::calculate`] is a dry run: it returns the candidate list and
//! counters, and never deletes. Deletion is a separate call taking the list
//! the caller approved.
//!
//! A blob is a candidate iff it decodes as a deployment built by our own
//! tooling, is older than `keep_age`, and no registry maps to it. Every
//! record that is kept protects its misc blob and, transitively, the
//! deployments it imports.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::manifest::DeploymentInfo;
use crate::storage::Storage;
use crate::url::ContentUrl;

/// What to keep.
#[derive(Clone, Debug, Default)]
pub struct PruneOptions {
    /// Only registry entries for this package name count as reachable.
    pub filter_package: Option<String>,
    /// Only registry entries for this variant count as reachable.
    pub filter_variant: Option<String>,
    /// Records younger than this many seconds are kept.
    pub keep_age: u64,
}

/// Counters by outcome. Every scanned blob lands in exactly one of
/// `not_package`, `foreign_generator`, `too_recent`, `registered`,
/// `protected`, `pruned`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub scanned: usize,
    pub not_package: usize,
    pub foreign_generator: usize,
    pub too_recent: usize,
    pub registered: usize,
    pub protected: usize,
    pub pruned: usize,
}

impl fmt::Display for PruneStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "scanned:           {}", self.scanned)?;
        writeln!(f, "not a package:     {}", self.not_package)?;
        writeln!(f, "foreign generator: {}", self.foreign_generator)?;
        writeln!(f, "too recent:        {}", self.too_recent)?;
        writeln!(f, "registered:        {}", self.registered)?;
        writeln!(f, "protected:         {}", self.protected)?;
        write!(f, "pruned:            {}", self.pruned)
    }
}

/// Result of a dry run.
#[derive(Clone, Debug, Default)]
pub struct PruneReport {
    /// URLs safe to delete, sorted.
    pub candidates: Vec<ContentUrl>,
    pub stats: PruneStats,
}

pub struct Pruner<'a> {
    storage: &'a Storage,
}

impl<'a> Pruner<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Compute the deletion candidates as of `now` (epoch seconds).
    pub async fn calculate(&self, options: &PruneOptions, now: u64) -> Result<PruneReport> {
        let mut universe = BTreeSet::new();
        for loader in self.storage.loaders() {
            let listed = loader.list().await?;
            debug!(loader = %loader.label(), count = listed.len(), "listed blobs");
            universe.extend(listed);
        }

        let keep_set = self
            .storage
            .registry()
            .get_all_urls(
                options.filter_package.as_deref(),
                options.filter_variant.as_deref(),
            )
            .await?;
        if let Some(filter) = &options.filter_package {
            if keep_set.is_empty() {
                return Err(Error::FilterYieldsEmpty {
                    filter: filter.clone(),
                });
            }
        }

        let cutoff = now.saturating_sub(options.keep_age);
        let mut stats = PruneStats {
            scanned: universe.len(),
            ..PruneStats::default()
        };
        let mut candidates: BTreeMap<ContentUrl, DeploymentInfo> = BTreeMap::new();
        let mut protect_queue: Vec<ContentUrl> = Vec::new();

        for url in universe {
            let info = match self.storage.read_blob::<DeploymentInfo>(&url).await {
                Ok(info) => info,
                Err(e) => {
                    debug!(url = %url, error = %e, "not a deployment, skipping");
                    stats.not_package += 1;
                    continue;
                }
            };

            if !info.is_own_build() {
                stats.foreign_generator += 1;
            } else if info.timestamp >= cutoff {
                stats.too_recent += 1;
            } else if keep_set.contains(&url) {
                stats.registered += 1;
            } else {
                candidates.insert(url, info);
                continue;
            }
            protect_queue.push(info.misc_url.clone());
            protect_queue.extend(info.import_urls());
        }

        // Anything a kept record points at is kept too, and protects in turn.
        while let Some(url) = protect_queue.pop() {
            if let Some(info) = candidates.remove(&url) {
                debug!(url = %url, "protected by a kept record");
                stats.protected += 1;
                protect_queue.push(info.misc_url.clone());
                protect_queue.extend(info.import_urls());
            }
        }

        stats.pruned = candidates.len();
        info!(
            scanned = stats.scanned,
            pruned = stats.pruned,
            protected = stats.protected,
            registered = stats.registered,
            "prune calculated"
        );
        Ok(PruneReport {
            candidates: candidates.into_keys().collect(),
            stats,
        })
    }

    /// Delete `urls`. Stops at the first hard failure; backends that cannot
    /// delete are skipped. Returns the number of URLs processed.
    pub async fn delete(&self, urls: &[ContentUrl]) -> Result<usize> {
        for url in urls {
            self.storage.delete_blob(url).await?;
        }
        info!(count = urls.len(), "pruned blobs");
        Ok(urls.len())
    }
}
