//! The build collaborator consumed by `alter import`.
//!
//! Executing steps is out of this crate's hands; all the alter engine needs
//! from a builder is to turn existing on-chain state into a step's artifacts
//! and to hash a step definition the way incremental builds do.

use async_trait::async_trait;
use serde_json::Value;

use super::commands::is_valid_address;
use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::manifest::{ChainArtifacts, ContractRecord};
use crate::storage::canonical_bytes;

#[async_trait]
pub trait Builder: Send + Sync {
    /// Whether steps of this action kind can be imported.
    fn supports_import(&self, kind: &str) -> bool;

    /// Artifacts for `step` (of action `kind`, configured by `config`) built
    /// from existing state named by `targets`.
    async fn import_existing(
        &self,
        kind: &str,
        step: &str,
        config: &Value,
        targets: &[String],
    ) -> Result<ChainArtifacts>;

    /// Integrity hash of a step definition.
    fn step_hash(&self, step: &str, config: &Value) -> Result<String>;
}

/// Import support for the built-in action kinds.
///
/// - `deploy.<Name>`: one target, the address the contract already lives at.
/// - `var.<name>`: `key=value` targets, recorded as extras.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultActions;

#[async_trait]
impl Builder for DefaultActions {
    fn supports_import(&self, kind: &str) -> bool {
        matches!(kind, "deploy" | "var")
    }

    async fn import_existing(
        &self,
        kind: &str,
        step: &str,
        config: &Value,
        targets: &[String],
    ) -> Result<ChainArtifacts> {
        let name = step.split_once('.').map_or(step, |(_, name)| name);
        let mut artifacts = ChainArtifacts::default();
        match kind {
            "deploy" => {
                let [address] = targets else {
                    return Err(Error::InvalidInput(format!(
                        "importing {} needs exactly one address",
                        step
                    )));
                };
                if !is_valid_address(address) {
                    return Err(Error::InvalidInput(format!(
                        "'{}' is not a valid address",
                        address
                    )));
                }
                let contract_name = config
                    .get("artifact")
                    .and_then(Value::as_str)
                    .unwrap_or(name)
                    .to_string();
                artifacts.contracts.insert(
                    name.to_string(),
                    ContractRecord {
                        address: address.clone(),
                        contract_name,
                        deployed_on: step.to_string(),
                        ..ContractRecord::default()
                    },
                );
            }
            "var" => {
                if targets.is_empty() {
                    return Err(Error::InvalidInput(format!(
                        "importing {} needs at least one key=value",
                        step
                    )));
                }
                for target in targets {
                    let (key, value) = target.split_once('=').ok_or_else(|| {
                        Error::InvalidInput(format!("'{}' is not key=value", target))
                    })?;
                    artifacts.extras.insert(key.to_string(), value.to_string());
                }
            }
            other => {
                return Err(Error::Unsupported(format!(
                    "action kind '{}' does not support import",
                    other
                )))
            }
        }
        Ok(artifacts)
    }

    fn step_hash(&self, step: &str, config: &Value) -> Result<String> {
        let mut bytes = step.as_bytes().to_vec();
        bytes.push(0);
        bytes.extend(canonical_bytes(config)?);
        Ok(ContentHash::digest(&bytes).to_hex())
    }
}
