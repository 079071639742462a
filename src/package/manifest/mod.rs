//! Deployment manifests: the blobs the package store is built around.
//!
//! A `DeploymentInfo` records one build of a package on one chain: the build
//! definition, per-step state with the artifacts each step produced, and the
//! URL of the auxiliary "misc" blob (sources, ABIs). Imported sub-packages
//! appear inside a step's artifacts as `ImportArtifacts`, carrying the URL of
//! the nested `DeploymentInfo` plus a summary of its artifacts.
//!
//! Blobs are immutable once written. Every mutation produces a new blob and,
//! for nested packages, requires rewriting every ancestor's import summary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::url::ContentUrl;

mod definition;

pub use definition::{BuildDefinition, ACTION_KINDS};


/// Step hash sentinel: treat the step as already satisfied.
pub const SKIP_HASH: &str = "SKIP";
/// Step hash sentinel: force the step to run again.
pub const INCOMPLETE_HASH: &str = "INCOMPLETE";
/// Generator prefix written by our own build tooling.
pub const BUILD_TOOL_TAG: &str = "cask";
/// Current step state schema version.
pub const STEP_STATE_VERSION: u32 = 7;

// ─── Data Types ────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    #[default]
    Complete,
    Partial,
}

/// One build of a package on one chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInfo {
    pub def: BuildDefinition,
    #[serde(default)]
    pub state: BTreeMap<String, StepState>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub meta: Map<String, Value>,
    pub misc_url: ContentUrl,
    #[serde(default)]
    pub status: DeploymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    pub timestamp: u64,
    #[serde(default)]
    pub chain_id: u64,
}

/// Recorded outcome of one build step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    /// Integrity hash, or one of `SKIP_HASH` / `INCOMPLETE_HASH`.
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub artifacts: ChainArtifacts,
    /// Chain-state dump captured during execution. Transient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_dump: Option<String>,
}

/// Artifact tree produced by a step or summarized for a whole package.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainArtifacts {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contracts: BTreeMap<String, ContractRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub txns: BTreeMap<String, TxnRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub imports: BTreeMap<String, ImportArtifacts>,
}

/// Summary of a nested package, pinned to the URL of its manifest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImportArtifacts {
    pub url: ContentUrl,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(flatten)]
    pub artifacts: ChainArtifacts,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRecord {
    pub address: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub abi: Vec<Value>,
    /// Hash of the deploying transaction. Cleared when the address is
    /// overwritten by hand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_txn_hash: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub contract_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deployed_on: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxnRecord {
    /// Transaction hash. Transient: meaningless once the record is moved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub events: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deployed_on: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ─── Artifact Merging ──────────────────────────────────────────────

impl ChainArtifacts {
    /// Merge `other` into `self`; entries in `other` win on name clashes.
    pub fn merge(&mut self, other: &ChainArtifacts) {
        for (name, contract) in &other.contracts {
            self.contracts.insert(name.clone(), contract.clone());
        }
        for (name, txn) in &other.txns {
            self.txns.insert(name.clone(), txn.clone());
        }
        for (name, value) in &other.extras {
            self.extras.insert(name.clone(), value.clone());
        }
        for (name, import) in &other.imports {
            self.imports.insert(name.clone(), import.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
            && self.txns.is_empty()
            && self.extras.is_empty()
            && self.imports.is_empty()
    }

    /// Drop transient execution data: deploy/txn hashes, recursively.
    pub fn strip_transient(&mut self) {
        for contract in self.contracts.values_mut() {
            contract.deploy_txn_hash = None;
        }
        for txn in self.txns.values_mut() {
            txn.hash = None;
        }
        for import in self.imports.values_mut() {
            import.artifacts.strip_transient();
        }
    }
}

impl ImportArtifacts {
    /// Summary entry for the deployment stored at `url`.
    pub fn from_deployment(url: ContentUrl, info: &DeploymentInfo) -> Self {
        Self {
            url,
            preset: info.def.preset.clone(),
            artifacts: info.artifacts(),
        }
    }
}

// ─── Deployment Queries ────────────────────────────────────────────

impl DeploymentInfo {
    /// Package-wide artifact summary: every step's artifacts merged in
    /// step-label order.
    pub fn artifacts(&self) -> ChainArtifacts {
        let mut merged = ChainArtifacts::default();
        for step in self.state.values() {
            merged.merge(&step.artifacts);
        }
        merged
    }

    /// URLs of the nested deployments this one imports directly.
    pub fn import_urls(&self) -> Vec<ContentUrl> {
        let mut urls = Vec::new();
        for step in self.state.values() {
            for import in step.artifacts.imports.values() {
                if !urls.contains(&import.url) {
                    urls.push(import.url.clone());
                }
            }
        }
        urls
    }

    /// True if this record was produced by our build tooling (or carries no
    /// generator tag at all).
    pub fn is_own_build(&self) -> bool {
        self.generator
            .as_deref()
            .map_or(true, |g| g.starts_with(BUILD_TOOL_TAG))
    }

    /// The step label holding the import named by a subpackage path element
    /// (`clone.token` imports `token`).
    pub fn import_entry(&self, path_item: &str) -> Result<&ImportArtifacts> {
        let step = self.state.get(path_item).ok_or_else(|| {
            Error::InvariantViolation(format!("subpackage step '{}' not found", path_item))
        })?;
        let leaf = import_name(path_item);
        step.artifacts.imports.get(leaf).ok_or_else(|| {
            Error::InvariantViolation(format!(
                "step '{}' has no import named '{}'",
                path_item, leaf
            ))
        })
    }

    /// Mutable counterpart of [`DeploymentInfo::import_entry`].
    pub fn import_entry_mut(&mut self, path_item: &str) -> Result<&mut ImportArtifacts> {
        let step = self.state.get_mut(path_item).ok_or_else(|| {
            Error::InvariantViolation(format!("subpackage step '{}' not found", path_item))
        })?;
        let leaf = import_name(path_item);
        step.artifacts.imports.get_mut(leaf).ok_or_else(|| {
            Error::InvariantViolation(format!(
                "step '{}' has no import named '{}'",
                path_item, leaf
            ))
        })
    }

    /// The single step whose artifacts contain `contract`.
    pub fn find_contract_step(&self, contract: &str) -> Result<String> {
        let mut found = self
            .state
            .iter()
            .filter(|(_, step)| step.artifacts.contracts.contains_key(contract))
            .map(|(label, _)| label.clone());
        let first = found
            .next()
            .ok_or_else(|| Error::NotFound(format!("contract '{}' in any step", contract)))?;
        if let Some(second) = found.next() {
            return Err(Error::InvalidInput(format!(
                "contract '{}' is produced by more than one step ('{}', '{}')",
                contract, first, second
            )));
        }
        Ok(first)
    }
}

/// Import name addressed by a step label: the part after the action kind.
pub fn import_name(step_label: &str) -> &str {
    step_label
        .split_once('.')
        .map_or(step_label, |(_, name)| name)
}
