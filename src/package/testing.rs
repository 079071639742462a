//! Shared fixtures for unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use crate::hash::ContentHash;
use crate::loader::MemoryLoader;
use crate::manifest::{
    BuildDefinition, ContractRecord, DeploymentInfo, ImportArtifacts, StepState,
    STEP_STATE_VERSION,
};
use crate::registry::MemoryRegistry;
use crate::storage::Storage;
use crate::url::{ContentUrl, FILE_SCHEME};

/// A single-step deployment of `name` deploying one `Token` contract.
pub(crate) fn deployment(name: &str, timestamp: u64) -> DeploymentInfo {
    let mut actions = BTreeMap::new();
    actions.insert(
        "deploy".to_string(),
        json!({ "Token": { "artifact": "Token" } }),
    );
    let mut token = StepState {
        hash: Some(format!("{}-token", name)),
        version: STEP_STATE_VERSION,
        ..StepState::default()
    };
    token.artifacts.contracts.insert(
        "Token".to_string(),
        ContractRecord {
            address: "0x1111111111111111111111111111111111111111".to_string(),
            deploy_txn_hash: Some("0xfeed".to_string()),
            contract_name: "Token".to_string(),
            ..ContractRecord::default()
        },
    );

    let mut state = BTreeMap::new();
    state.insert("deploy.Token".to_string(), token);

    DeploymentInfo {
        def: BuildDefinition {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            preset: None,
            actions,
        },
        state,
        options: BTreeMap::new(),
        meta: serde_json::Map::new(),
        misc_url: misc_url(name),
        status: Default::default(),
        generator: Some("cask 1.0".to_string()),
        timestamp,
        chain_id: 13370,
    }
}

/// A stable, distinct misc URL per package name.
pub(crate) fn misc_url(name: &str) -> ContentUrl {
    ContentUrl::file(&ContentHash::digest(format!("misc:{}", name).as_bytes()))
}

/// Add a `clone.<import>` step to `parent` importing `child` stored at `url`.
pub(crate) fn add_import(
    parent: &mut DeploymentInfo,
    import: &str,
    url: &ContentUrl,
    child: &DeploymentInfo,
) {
    let label = format!("clone.{}", import);
    let steps = parent
        .def
        .actions
        .entry("clone".to_string())
        .or_insert_with(|| json!({}));
    if let Some(steps) = steps.as_object_mut() {
        steps.insert(
            import.to_string(),
            json!({ "source": format!("{}:{}", child.def.name, child.def.version) }),
        );
    }
    let mut step = StepState {
        hash: Some(format!("clone-{}", import)),
        version: STEP_STATE_VERSION,
        ..StepState::default()
    };
    step.artifacts.imports.insert(
        import.to_string(),
        ImportArtifacts::from_deployment(url.clone(), child),
    );
    parent.state.insert(label, step);
}

/// Writable in-memory storage: a `file` loader and one memory registry.
pub(crate) fn memory_storage() -> (Storage, Arc<MemoryLoader>, Arc<MemoryRegistry>) {
    let loader = Arc::new(MemoryLoader::new(FILE_SCHEME));
    let registry = Arc::new(MemoryRegistry::new("test"));
    let storage = Storage::new(registry.clone())
        .with_loader(loader.clone())
        .with_write_scheme(Some(FILE_SCHEME));
    (storage, loader, registry)
}
