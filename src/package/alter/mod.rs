//! Alter: mutate a stored deployment without rebuilding it.
//!
//! The engine loads the root deployment of a package, follows a path of
//! subpackage steps down to a nested deployment (the leaf), applies one
//! [`AlterCommand`] to the leaf, and then writes the tree back bottom-up.
//! Each ancestor's import entry is repointed at the rewritten child and its
//! artifact summary recomputed before the ancestor itself is written. The
//! root is republished last, under the altered reference only, so nothing
//! is visible through the registry until every level has been written.
//!
//! ```text
//!   root ── clone.a ──▶ A ── clone.b ──▶ B (leaf, mutated)
//!   write B → B'   A.imports[b] = B'   write A → A'   root.imports[a] = A'
//!   write root → root'   publish root'
//! ```

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::manifest::{DeploymentInfo, ImportArtifacts, STEP_STATE_VERSION};
use crate::reference::PackageReference;
use crate::storage::Storage;
use crate::url::ContentUrl;

mod builder;
mod commands;

pub use builder::{Builder, DefaultActions};
pub use commands::{is_valid_address, AlterCommand, MIGRATE_212_PREFIXES};

#[cfg(test)]
mod tests;

/// What an alter run wrote.
#[derive(Clone, Debug)]
pub struct AlterOutcome {
    /// Root manifest URL before the change.
    pub old_root_url: ContentUrl,
    /// Root manifest URL now published.
    pub new_root_url: ContentUrl,
    /// Every URL written, leaf first, root last.
    pub rewritten: Vec<ContentUrl>,
    /// Registry receipts for the root publication.
    pub receipts: Vec<String>,
}

pub struct AlterEngine<'a> {
    storage: &'a Storage,
    builder: &'a dyn Builder,
}

impl<'a> AlterEngine<'a> {
    pub fn new(storage: &'a Storage, builder: &'a dyn Builder) -> Self {
        Self { storage, builder }
    }

    /// Apply `command` to the deployment reached from `package` on
    /// `chain_id` by following `subpackage_path` (step labels such as
    /// `clone.token`), then republish the root.
    pub async fn alter(
        &self,
        package: &PackageReference,
        chain_id: u64,
        subpackage_path: &[String],
        command: &AlterCommand,
    ) -> Result<AlterOutcome> {
        let (root_url, root) = self
            .storage
            .read_deploy_at(package, chain_id)
            .await?
            .ok_or_else(|| Error::PackageNotFound {
                package: package.full_package_ref(),
                chain_id,
            })?;

        // Stack of deployments from the root down to the leaf.
        let mut stack = vec![root];
        for path_item in subpackage_path {
            let parent = stack
                .last()
                .ok_or_else(|| Error::Internal("empty alter stack".into()))?;
            let url = parent.import_entry(path_item)?.url.clone();
            debug!(step = %path_item, url = %url, "descending into subpackage");
            let child: DeploymentInfo = self.storage.read_blob(&url).await?;
            stack.push(child);
        }

        let mut leaf = stack
            .pop()
            .ok_or_else(|| Error::Internal("empty alter stack".into()))?;
        self.apply(&mut leaf, chain_id, command).await?;

        let mut rewritten = Vec::with_capacity(subpackage_path.len() + 1);
        let mut child_url = self.write(&leaf).await?;
        rewritten.push(child_url.clone());
        let mut child = leaf;

        for path_item in subpackage_path.iter().rev() {
            let mut parent = stack
                .pop()
                .ok_or_else(|| Error::Internal("alter stack underflow".into()))?;
            let entry = parent.import_entry_mut(path_item)?;
            *entry = ImportArtifacts {
                url: child_url,
                preset: entry.preset.clone(),
                artifacts: child.artifacts(),
            };
            child_url = self.write(&parent).await?;
            rewritten.push(child_url.clone());
            child = parent;
        }

        // Only the reference that was altered moves; `latest` stays put.
        let meta_url = self.storage.resolve_meta_url(package, chain_id).await?;
        let receipts = self
            .storage
            .registry()
            .publish(
                &[package.base_package_ref()],
                &package.variant(chain_id),
                &child_url,
                meta_url.as_ref(),
            )
            .await?;
        info!(
            package = %package,
            chain_id,
            command = %command,
            old = %root_url,
            new = %child_url,
            "altered package"
        );

        Ok(AlterOutcome {
            old_root_url: root_url,
            new_root_url: child_url,
            rewritten,
            receipts,
        })
    }

    /// `put_deploy` that refuses to continue without a URL.
    async fn write(&self, info: &DeploymentInfo) -> Result<ContentUrl> {
        self.storage.put_deploy(info).await?.ok_or_else(|| {
            Error::InvariantViolation(format!(
                "writing {} returned no url; storage is not writable",
                info.def.name
            ))
        })
    }

    async fn apply(
        &self,
        leaf: &mut DeploymentInfo,
        chain_id: u64,
        command: &AlterCommand,
    ) -> Result<()> {
        match command {
            AlterCommand::SetUrl { url } => {
                let mut replacement: DeploymentInfo = self.storage.read_blob(url).await?;
                commands::strip_transient(&mut replacement);
                self.refresh_imports(&mut replacement, chain_id).await;
                *leaf = replacement;
            }
            AlterCommand::SetMisc { url } => leaf.misc_url = url.clone(),
            AlterCommand::SetContractAddress { contract, address } => {
                commands::set_contract_address(leaf, contract, address)?;
            }
            AlterCommand::Import { step, targets } => self.import(leaf, step, targets).await?,
            AlterCommand::MarkComplete { steps } => commands::mark_complete(leaf, steps),
            AlterCommand::MarkIncomplete { steps } => commands::mark_incomplete(leaf, steps)?,
            AlterCommand::CleanUnused => {
                let removed = commands::clean_unused(leaf)?;
                info!(removed = removed.len(), "removed unused step state");
            }
            AlterCommand::Migrate212 => self.migrate_212(leaf).await?,
        }
        Ok(())
    }

    /// Re-resolve every import of `info` against the current chain. Steps
    /// whose definition names a `source` package are looked up in the
    /// registry; the rest are re-read from the URL they record. Lookups
    /// that fail leave the recorded entry in place.
    async fn refresh_imports(&self, info: &mut DeploymentInfo, chain_id: u64) {
        let labels: Vec<String> = info.state.keys().cloned().collect();
        for label in labels {
            let source = info
                .def
                .step(&label)
                .and_then(|cfg| cfg.get("source"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let Some(step) = info.state.get_mut(&label) else {
                continue;
            };
            for (name, import) in step.artifacts.imports.iter_mut() {
                let refreshed = match &source {
                    Some(source) => self.lookup_source(source, import, chain_id).await,
                    None => self
                        .storage
                        .read_blob::<DeploymentInfo>(&import.url)
                        .await
                        .map(|nested| Some((import.url.clone(), nested))),
                };
                match refreshed {
                    Ok(Some((url, nested))) => {
                        let recorded = import.preset.take();
                        *import = ImportArtifacts::from_deployment(url, &nested);
                        if recorded.is_some() {
                            import.preset = recorded;
                        }
                    }
                    Ok(None) => {
                        warn!(
                            step = %label,
                            import = %name,
                            "import not found on current chain, keeping recorded artifacts"
                        );
                    }
                    Err(e) => {
                        warn!(
                            step = %label,
                            import = %name,
                            error = %e,
                            "could not refresh import, keeping recorded artifacts"
                        );
                    }
                }
            }
        }
    }

    async fn lookup_source(
        &self,
        source: &str,
        import: &ImportArtifacts,
        chain_id: u64,
    ) -> Result<Option<(ContentUrl, DeploymentInfo)>> {
        let mut package = PackageReference::parse(source)?;
        if let Some(preset) = &import.preset {
            package = PackageReference::from_parts(
                package.name(),
                Some(package.version()),
                Some(preset),
            )?;
        }
        self.storage.read_deploy_at(&package, chain_id).await
    }

    async fn import(
        &self,
        leaf: &mut DeploymentInfo,
        step: &str,
        targets: &[String],
    ) -> Result<()> {
        let (kind, _) = step.split_once('.').ok_or_else(|| {
            Error::InvalidInput(format!("'{}' is not a step label (kind.name)", step))
        })?;
        if !self.builder.supports_import(kind) {
            return Err(Error::Unsupported(format!(
                "action kind '{}' does not support import",
                kind
            )));
        }
        let config = leaf
            .def
            .step(step)
            .cloned()
            .ok_or_else(|| Error::InvalidInput(format!("step '{}' is not in the definition", step)))?;

        let artifacts = self
            .builder
            .import_existing(kind, step, &config, targets)
            .await?;
        let hash = self.builder.step_hash(step, &config)?;

        let state = leaf.state.entry(step.to_string()).or_default();
        state.artifacts = artifacts;
        state.hash = Some(hash);
        state.version = STEP_STATE_VERSION;
        state.chain_dump = None;
        Ok(())
    }

    /// Migrate nested `provision.*` imports bottom-up, then rename this
    /// record's own steps.
    fn migrate_212<'b>(
        &'b self,
        info: &'b mut DeploymentInfo,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'b>> {
        Box::pin(async move {
            commands::check_legacy_renames(info)?;
            let provisions: Vec<String> = info
                .state
                .keys()
                .filter(|label| label.starts_with("provision."))
                .cloned()
                .collect();
            for label in provisions {
                let names: Vec<String> = info
                    .state
                    .get(&label)
                    .map(|s| s.artifacts.imports.keys().cloned().collect())
                    .unwrap_or_default();
                for name in names {
                    let Some(url) = info
                        .state
                        .get(&label)
                        .and_then(|s| s.artifacts.imports.get(&name))
                        .map(|import| import.url.clone())
                    else {
                        continue;
                    };
                    let mut nested: DeploymentInfo = self.storage.read_blob(&url).await?;
                    self.migrate_212(&mut nested).await?;
                    let new_url = self.write(&nested).await?;
                    debug!(step = %label, import = %name, url = %new_url, "migrated nested package");
                    if let Some(import) = info
                        .state
                        .get_mut(&label)
                        .and_then(|s| s.artifacts.imports.get_mut(&name))
                    {
                        let recorded = import.preset.take();
                        *import = ImportArtifacts::from_deployment(new_url, &nested);
                        if recorded.is_some() {
                            import.preset = recorded;
                        }
                    }
                }
            }
            commands::rename_legacy_steps(info)
        })
    }
}
