use std::fmt;

use tracing::warn;

use crate::error::{Error, Result};
use crate::manifest::{
    DeploymentInfo, StepState, INCOMPLETE_HASH, SKIP_HASH, STEP_STATE_VERSION,
};
use crate::url::ContentUrl;

/// Step-label prefixes renamed by the 2.12 schema migration.
pub const MIGRATE_212_PREFIXES: &[(&str, &str)] =
    &[("contract", "deploy"), ("import", "pull"), ("provision", "clone")];

/// One mutation applied to the leaf of an alter path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AlterCommand {
    /// Replace the leaf with the deployment stored at `url`.
    SetUrl { url: ContentUrl },
    /// Point the leaf's misc blob at `url`.
    SetMisc { url: ContentUrl },
    /// Overwrite a deployed contract's address.
    SetContractAddress { contract: String, address: String },
    /// Record existing on-chain state as the result of `step`.
    Import { step: String, targets: Vec<String> },
    /// Force steps to be treated as already satisfied.
    MarkComplete { steps: Vec<String> },
    /// Force steps to run again on the next build.
    MarkIncomplete { steps: Vec<String> },
    /// Drop state for steps the definition no longer has.
    CleanUnused,
    /// Rename pre-2.12 step labels, nested `provision` imports first.
    Migrate212,
}

impl AlterCommand {
    /// Parse a command verb and its positional targets.
    pub fn parse(verb: &str, targets: &[String]) -> Result<Self> {
        let need = |n: usize| -> Result<()> {
            if targets.len() < n {
                return Err(Error::InvalidInput(format!(
                    "'{}' expects {} argument(s), got {}",
                    verb,
                    n,
                    targets.len()
                )));
            }
            Ok(())
        };

        let command = match verb {
            "set-url" => {
                need(1)?;
                Self::SetUrl {
                    url: ContentUrl::parse(&targets[0])?,
                }
            }
            "set-misc" => {
                need(1)?;
                Self::SetMisc {
                    url: ContentUrl::parse(&targets[0])?,
                }
            }
            "set-contract-address" => {
                need(2)?;
                Self::SetContractAddress {
                    contract: targets[0].clone(),
                    address: targets[1].clone(),
                }
            }
            "import" => {
                need(1)?;
                Self::Import {
                    step: targets[0].clone(),
                    targets: targets[1..].to_vec(),
                }
            }
            "mark-complete" => {
                need(1)?;
                Self::MarkComplete {
                    steps: targets.to_vec(),
                }
            }
            "mark-incomplete" => {
                need(1)?;
                Self::MarkIncomplete {
                    steps: targets.to_vec(),
                }
            }
            "clean-unused" => Self::CleanUnused,
            "migrate-212" => Self::Migrate212,
            other => {
                return Err(Error::InvalidInput(format!(
                    "unknown alter command '{}'",
                    other
                )))
            }
        };
        Ok(command)
    }

    /// The CLI verb.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::SetUrl { .. } => "set-url",
            Self::SetMisc { .. } => "set-misc",
            Self::SetContractAddress { .. } => "set-contract-address",
            Self::Import { .. } => "import",
            Self::MarkComplete { .. } => "mark-complete",
            Self::MarkIncomplete { .. } => "mark-incomplete",
            Self::CleanUnused => "clean-unused",
            Self::Migrate212 => "migrate-212",
        }
    }
}

impl fmt::Display for AlterCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// `0x` followed by exactly 40 hex digits.
pub fn is_valid_address(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 40 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
}

// ─── Synchronous Mutations ─────────────────────────────────────────

pub(super) fn set_contract_address(
    leaf: &mut DeploymentInfo,
    contract: &str,
    address: &str,
) -> Result<()> {
    if !is_valid_address(address) {
        return Err(Error::InvalidInput(format!(
            "'{}' is not a valid address (expected 0x followed by 40 hex digits)",
            address
        )));
    }
    let step = leaf.find_contract_step(contract)?;
    let record = leaf
        .state
        .get_mut(&step)
        .and_then(|s| s.artifacts.contracts.get_mut(contract))
        .ok_or_else(|| Error::Internal(format!("contract '{}' vanished from '{}'", contract, step)))?;
    record.address = address.to_string();
    record.deploy_txn_hash = None;
    Ok(())
}

pub(super) fn mark_complete(leaf: &mut DeploymentInfo, steps: &[String]) {
    for step in steps {
        match leaf.state.get_mut(step) {
            Some(state) => state.hash = Some(SKIP_HASH.to_string()),
            None => {
                warn!(step = %step, "step has no state yet, creating an empty completed record");
                leaf.state.insert(
                    step.clone(),
                    StepState {
                        hash: Some(SKIP_HASH.to_string()),
                        version: STEP_STATE_VERSION,
                        ..StepState::default()
                    },
                );
            }
        }
    }
}

pub(super) fn mark_incomplete(leaf: &mut DeploymentInfo, steps: &[String]) -> Result<()> {
    if let Some(missing) = steps.iter().find(|s| !leaf.state.contains_key(*s)) {
        return Err(Error::InvalidInput(format!("step '{}' has no state", missing)));
    }
    for step in steps {
        if let Some(state) = leaf.state.get_mut(step) {
            state.hash = Some(INCOMPLETE_HASH.to_string());
        }
    }
    Ok(())
}

/// Returns the removed step labels.
pub(super) fn clean_unused(leaf: &mut DeploymentInfo) -> Result<Vec<String>> {
    let order = leaf.def.topological_steps()?;
    let removed: Vec<String> = leaf
        .state
        .keys()
        .filter(|label| !order.contains(label))
        .cloned()
        .collect();
    for label in &removed {
        leaf.state.remove(label);
    }
    Ok(removed)
}

/// The post-2.12 label for `label`, if it uses a legacy prefix.
fn migrated_label(label: &str) -> Option<String> {
    let (kind, name) = label.split_once('.')?;
    let (_, to) = MIGRATE_212_PREFIXES.iter().find(|(from, _)| *from == kind)?;
    Some(format!("{}.{}", to, name))
}

/// Fail if renaming a legacy step would land on a step that already exists,
/// in the recorded state or in the definition.
pub(super) fn check_legacy_renames(leaf: &DeploymentInfo) -> Result<()> {
    for label in leaf.state.keys() {
        if let Some(renamed) = migrated_label(label) {
            if leaf.state.contains_key(&renamed) {
                return Err(Error::InvalidInput(format!(
                    "cannot migrate '{}': state for '{}' already exists",
                    label, renamed
                )));
            }
        }
    }
    for label in leaf.def.step_labels() {
        if let Some(renamed) = migrated_label(&label) {
            if leaf.def.step(&renamed).is_some() {
                return Err(Error::InvalidInput(format!(
                    "cannot migrate '{}': the definition already has '{}'",
                    label, renamed
                )));
            }
        }
    }
    Ok(())
}

/// Rename pre-2.12 state keys and definition actions in place. Nested
/// imports are handled by the engine before this runs. Nothing is renamed
/// when any rename would collide.
pub(super) fn rename_legacy_steps(leaf: &mut DeploymentInfo) -> Result<()> {
    check_legacy_renames(leaf)?;
    let labels: Vec<String> = leaf.state.keys().cloned().collect();
    for label in labels {
        let Some(renamed) = migrated_label(&label) else {
            continue;
        };
        if let Some(state) = leaf.state.remove(&label) {
            leaf.state.insert(renamed, state);
        }
    }
    for (from, to) in MIGRATE_212_PREFIXES {
        leaf.def.rename_action(from, to);
    }
    Ok(())
}

/// Drop execution leftovers that do not survive a move between packages.
pub(super) fn strip_transient(leaf: &mut DeploymentInfo) {
    for state in leaf.state.values_mut() {
        state.chain_dump = None;
        state.artifacts.strip_transient();
    }
}
