//! Import resolution: materialize every nested deployment reachable from a
//! root through `state[*].artifacts.imports[*].url`.
//!
//! A single coordinator owns the visited set, so a URL is claimed exactly
//! once. Fetches run as spawned tasks, each holding one semaphore permit
//! while it talks to the backend; the walk ends when the task set drains.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::manifest::DeploymentInfo;
use crate::storage::Storage;
use crate::url::ContentUrl;

/// Fetches allowed in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// A root deployment plus everything it transitively imports.
#[derive(Debug)]
pub struct ResolvedTree {
    pub root: DeploymentInfo,
    /// Nested deployments, keyed by the URL they were read from.
    pub deployments: BTreeMap<ContentUrl, DeploymentInfo>,
    /// URLs that could not be fetched or decoded, with the reason.
    pub failed: BTreeMap<ContentUrl, String>,
}

impl ResolvedTree {
    pub fn get(&self, url: &ContentUrl) -> Option<&DeploymentInfo> {
        self.deployments.get(url)
    }

    /// True when every reachable import was fetched.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of nested deployments, excluding the root.
    pub fn len(&self) -> usize {
        self.deployments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }
}

pub struct ImportResolver {
    storage: Arc<Storage>,
    concurrency: usize,
}

impl ImportResolver {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Bound on concurrent fetches (at least one).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Walk the import graph below `root`.
    ///
    /// A failed fetch is recorded in [`ResolvedTree::failed`] and the walk
    /// continues with the remaining branches.
    pub async fn resolve(&self, root: DeploymentInfo) -> Result<ResolvedTree> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut visited: HashSet<ContentUrl> = HashSet::new();
        let mut tasks: JoinSet<(ContentUrl, Result<DeploymentInfo>)> = JoinSet::new();

        let mut tree = ResolvedTree {
            deployments: BTreeMap::new(),
            failed: BTreeMap::new(),
            root,
        };

        for url in tree.root.import_urls() {
            if visited.insert(url.clone()) {
                self.spawn_fetch(&mut tasks, &permits, url);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            let (url, fetched) =
                joined.map_err(|e| Error::Internal(format!("import fetch task failed: {}", e)))?;
            match fetched {
                Ok(info) => {
                    for child in info.import_urls() {
                        if visited.insert(child.clone()) {
                            self.spawn_fetch(&mut tasks, &permits, child);
                        }
                    }
                    debug!(url = %url, package = %info.def.name, "resolved import");
                    tree.deployments.insert(url, info);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "could not resolve import");
                    tree.failed.insert(url, e.to_string());
                }
            }
        }

        Ok(tree)
    }

    fn spawn_fetch(
        &self,
        tasks: &mut JoinSet<(ContentUrl, Result<DeploymentInfo>)>,
        permits: &Arc<Semaphore>,
        url: ContentUrl,
    ) {
        let storage = Arc::clone(&self.storage);
        let permits = Arc::clone(permits);
        tasks.spawn(async move {
            let fetched = match permits.acquire_owned().await {
                Ok(_permit) => storage.read_blob::<DeploymentInfo>(&url).await,
                Err(e) => Err(Error::Internal(format!("fetch semaphore closed: {}", e))),
            };
            (url, fetched)
        });
    }
}
