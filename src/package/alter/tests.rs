use std::sync::Arc;

use serde_json::json;

use super::*;
use crate::loader::MemoryLoader;
use crate::manifest::{INCOMPLETE_HASH, SKIP_HASH};
use crate::registry::{MemoryRegistry, Registry};
use crate::storage::canonical_bytes;
use crate::testing::{add_import, deployment, memory_storage, misc_url};
use crate::url::FILE_SCHEME;

const CHAIN: u64 = 13370;
const ADDRESS: &str = "0x2222222222222222222222222222222222222222";

async fn publish(storage: &Storage, reference: &str, info: &DeploymentInfo) -> ContentUrl {
    let url = storage.put_deploy(info).await.unwrap().unwrap();
    let package = PackageReference::parse(reference).unwrap();
    storage.publish(&package, CHAIN, &url, None).await.unwrap();
    url
}

/// `root:1.0.0` importing `child` through step `clone.child`.
async fn publish_tree(storage: &Storage) -> (PackageReference, ContentUrl) {
    let child = deployment("child", 1);
    let child_url = storage.put_deploy(&child).await.unwrap().unwrap();
    let mut root = deployment("root", 1);
    add_import(&mut root, "child", &child_url, &child);
    publish(storage, "root:1.0.0", &root).await;
    (PackageReference::parse("root:1.0.0").unwrap(), child_url)
}

async fn alter(
    storage: &Storage,
    package: &PackageReference,
    path: &[&str],
    command: AlterCommand,
) -> Result<AlterOutcome> {
    let path: Vec<String> = path.iter().map(|s| s.to_string()).collect();
    AlterEngine::new(storage, &DefaultActions)
        .alter(package, CHAIN, &path, &command)
        .await
}

async fn root_of(storage: &Storage, package: &PackageReference) -> DeploymentInfo {
    storage.read_deploy(package, CHAIN).await.unwrap().unwrap()
}

// ─── Command Parsing ───────────────────────────────────────────────

#[test]
fn test_parse_commands() {
    let args = |a: &[&str]| a.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    assert_eq!(
        AlterCommand::parse("set-misc", &args(&["@ipfs:QmMisc"])).unwrap(),
        AlterCommand::SetMisc {
            url: ContentUrl::ipfs("QmMisc").unwrap()
        }
    );
    assert_eq!(
        AlterCommand::parse("set-contract-address", &args(&["Token", ADDRESS])).unwrap(),
        AlterCommand::SetContractAddress {
            contract: "Token".into(),
            address: ADDRESS.into()
        }
    );
    assert_eq!(
        AlterCommand::parse("import", &args(&["var.cfg", "a=1", "b=2"])).unwrap(),
        AlterCommand::Import {
            step: "var.cfg".into(),
            targets: args(&["a=1", "b=2"])
        }
    );
    assert_eq!(
        AlterCommand::parse("migrate-212", &[]).unwrap(),
        AlterCommand::Migrate212
    );
    assert_eq!(AlterCommand::Migrate212.to_string(), "migrate-212");
    assert!(AlterCommand::parse("set-url", &[]).is_err());
    assert!(AlterCommand::parse("mark-complete", &[]).is_err());
    assert!(AlterCommand::parse("explode", &[]).is_err());
}

#[test]
fn test_address_validation() {
    assert!(is_valid_address(ADDRESS));
    assert!(is_valid_address("0xABCDEFabcdef0123456789012345678901234567"));
    assert!(!is_valid_address("0x1234"));
    assert!(!is_valid_address("2222222222222222222222222222222222222222"));
    assert!(!is_valid_address("0xzz22222222222222222222222222222222222222"));
}

// ─── Step State Commands ───────────────────────────────────────────

#[tokio::test]
async fn test_mark_complete_creates_missing_step() {
    let (storage, _, _) = memory_storage();
    let (package, _) = publish_tree(&storage).await;

    let steps = vec!["deploy.Token".to_string(), "invoke.mint".to_string()];
    alter(&storage, &package, &[], AlterCommand::MarkComplete { steps })
        .await
        .unwrap();

    let root = root_of(&storage, &package).await;
    assert_eq!(root.state["deploy.Token"].hash.as_deref(), Some(SKIP_HASH));
    let created = &root.state["invoke.mint"];
    assert_eq!(created.hash.as_deref(), Some(SKIP_HASH));
    assert!(created.artifacts.is_empty());
}

#[tokio::test]
async fn test_mark_incomplete() {
    let (storage, _, _) = memory_storage();
    let (package, _) = publish_tree(&storage).await;

    let missing = AlterCommand::MarkIncomplete {
        steps: vec!["invoke.nope".into()],
    };
    let err = alter(&storage, &package, &[], missing).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let command = AlterCommand::MarkIncomplete {
        steps: vec!["deploy.Token".into()],
    };
    alter(&storage, &package, &[], command).await.unwrap();
    let root = root_of(&storage, &package).await;
    assert_eq!(
        root.state["deploy.Token"].hash.as_deref(),
        Some(INCOMPLETE_HASH)
    );
}

#[tokio::test]
async fn test_clean_unused_drops_orphaned_state() {
    let (storage, _, _) = memory_storage();
    let mut root = deployment("root", 1);
    root.state
        .insert("deploy.Removed".into(), root.state["deploy.Token"].clone());
    publish(&storage, "root:1.0.0", &root).await;
    let package = PackageReference::parse("root:1.0.0").unwrap();

    alter(&storage, &package, &[], AlterCommand::CleanUnused)
        .await
        .unwrap();
    let root = root_of(&storage, &package).await;
    let labels: Vec<&String> = root.state.keys().collect();
    assert_eq!(labels, vec!["deploy.Token"]);
}

// ─── Contract Address ──────────────────────────────────────────────

#[tokio::test]
async fn test_invalid_contract_address_changes_nothing() {
    let (storage, loader, registry) = memory_storage();
    let (package, _) = publish_tree(&storage).await;
    let before = storage.resolve_url(&package, CHAIN).await.unwrap();
    let writes = loader.writes();
    let publishes = registry.publishes();

    let command = AlterCommand::SetContractAddress {
        contract: "Token".into(),
        address: "0xnothex".into(),
    };
    let err = alter(&storage, &package, &["clone.child"], command)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    assert_eq!(storage.resolve_url(&package, CHAIN).await.unwrap(), before);
    assert_eq!(loader.writes(), writes);
    assert_eq!(registry.publishes(), publishes);
}

#[tokio::test]
async fn test_set_contract_address_in_subpackage() {
    let (storage, _, _) = memory_storage();
    let (package, _) = publish_tree(&storage).await;

    let command = AlterCommand::SetContractAddress {
        contract: "Token".into(),
        address: ADDRESS.into(),
    };
    let outcome = alter(&storage, &package, &["clone.child"], command)
        .await
        .unwrap();

    let child: DeploymentInfo = storage.read_blob(&outcome.rewritten[0]).await.unwrap();
    let token = &child.state["deploy.Token"].artifacts.contracts["Token"];
    assert_eq!(token.address, ADDRESS);
    assert_eq!(token.deploy_txn_hash, None);

    // The parent's summary of the child follows.
    let root = root_of(&storage, &package).await;
    let import = &root.state["clone.child"].artifacts.imports["child"];
    assert_eq!(import.url, outcome.rewritten[0]);
    assert_eq!(import.artifacts, child.artifacts());
    // The root's own Token is untouched.
    assert_ne!(root.state["deploy.Token"].artifacts.contracts["Token"].address, ADDRESS);
}

#[tokio::test]
async fn test_unknown_contract_is_not_found() {
    let (storage, _, _) = memory_storage();
    let (package, _) = publish_tree(&storage).await;
    let command = AlterCommand::SetContractAddress {
        contract: "Missing".into(),
        address: ADDRESS.into(),
    };
    let err = alter(&storage, &package, &[], command).await.unwrap_err();
    assert!(err.is_not_found());
}

// ─── Tree Rewrite ──────────────────────────────────────────────────

#[tokio::test]
async fn test_set_misc_in_subpackage_rewrites_ancestors() {
    let (storage, _, registry) = memory_storage();
    let (package, child_url) = publish_tree(&storage).await;
    let new_misc = misc_url("replacement");

    let outcome = alter(
        &storage,
        &package,
        &["clone.child"],
        AlterCommand::SetMisc {
            url: new_misc.clone(),
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.rewritten.len(), 2);
    assert_ne!(outcome.rewritten[0], child_url);
    assert_ne!(outcome.new_root_url, outcome.old_root_url);
    assert_eq!(outcome.rewritten[1], outcome.new_root_url);

    let root = root_of(&storage, &package).await;
    assert_eq!(
        root.state["clone.child"].artifacts.imports["child"].url,
        outcome.rewritten[0]
    );
    let child: DeploymentInfo = storage.read_blob(&outcome.rewritten[0]).await.unwrap();
    assert_eq!(child.misc_url, new_misc);

    assert_eq!(
        registry.get_url("root:1.0.0", "13370-main").await.unwrap(),
        Some(outcome.new_root_url.clone())
    );
}

#[tokio::test]
async fn test_alter_old_version_leaves_latest_alone() {
    let (storage, _, registry) = memory_storage();
    let (package, _) = publish_tree(&storage).await;
    let newer = deployment("root", 2);
    let newer_url = publish(&storage, "root:2.0.0", &newer).await;
    assert_eq!(
        registry.get_url("root:latest", "13370-main").await.unwrap(),
        Some(newer_url.clone())
    );

    let outcome = alter(
        &storage,
        &package,
        &[],
        AlterCommand::SetMisc {
            url: misc_url("replacement"),
        },
    )
    .await
    .unwrap();

    assert_eq!(
        registry.get_url("root:1.0.0", "13370-main").await.unwrap(),
        Some(outcome.new_root_url)
    );
    assert_eq!(
        registry.get_url("root:latest", "13370-main").await.unwrap(),
        Some(newer_url)
    );
    assert_eq!(outcome.receipts.len(), 1);
}

#[tokio::test]
async fn test_missing_subpackage_step_is_invariant_violation() {
    let (storage, _, _) = memory_storage();
    let (package, _) = publish_tree(&storage).await;
    let err = alter(
        &storage,
        &package,
        &["clone.nope"],
        AlterCommand::SetMisc {
            url: misc_url("x"),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::InvariantViolation(_)));
}

#[tokio::test]
async fn test_unknown_package_is_not_found() {
    let (storage, _, _) = memory_storage();
    let package = PackageReference::parse("ghost").unwrap();
    let err = alter(&storage, &package, &[], AlterCommand::CleanUnused)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PackageNotFound { chain_id: CHAIN, .. }));
}

#[tokio::test]
async fn test_unwritable_storage_publishes_nothing() {
    let loader = Arc::new(MemoryLoader::new(FILE_SCHEME));
    let registry = Arc::new(MemoryRegistry::new("r"));
    let root = deployment("root", 1);
    let url = loader.insert(canonical_bytes(&root).unwrap()).unwrap();
    registry
        .insert("root:1.0.0", "13370-main", url.clone(), None)
        .unwrap();
    let storage = Storage::new(registry.clone()).with_loader(loader);
    let package = PackageReference::parse("root:1.0.0").unwrap();

    let err = alter(
        &storage,
        &package,
        &[],
        AlterCommand::SetMisc {
            url: misc_url("x"),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::InvariantViolation(_)));
    assert_eq!(registry.publishes(), 0);
    assert_eq!(storage.resolve_url(&package, CHAIN).await.unwrap(), Some(url));
}

#[tokio::test]
async fn test_meta_url_is_carried_over() {
    let (storage, _, registry) = memory_storage();
    let root = deployment("root", 1);
    let url = storage.put_deploy(&root).await.unwrap().unwrap();
    let meta = misc_url("meta");
    registry
        .insert("root:1.0.0", "13370-main", url, Some(meta.clone()))
        .unwrap();
    let package = PackageReference::parse("root:1.0.0").unwrap();

    alter(&storage, &package, &[], AlterCommand::CleanUnused)
        .await
        .unwrap();
    assert_eq!(
        storage.resolve_meta_url(&package, CHAIN).await.unwrap(),
        Some(meta)
    );
}

// ─── set-url ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_set_url_strips_transient_and_refreshes_imports() {
    let (storage, _, _) = memory_storage();
    let (package, old_child_url) = publish_tree(&storage).await;

    // The child was rebuilt on this chain since the replacement was recorded.
    let mut newer_child = deployment("child", 5);
    newer_child
        .state
        .get_mut("deploy.Token")
        .unwrap()
        .artifacts
        .contracts
        .get_mut("Token")
        .unwrap()
        .address = ADDRESS.into();
    let newer_child_url = publish(&storage, "child:1.0.0", &newer_child).await;

    let old_child: DeploymentInfo = storage.read_blob(&old_child_url).await.unwrap();
    let mut replacement = deployment("root", 2);
    add_import(&mut replacement, "child", &old_child_url, &old_child);
    replacement.state.get_mut("deploy.Token").unwrap().chain_dump = Some("0xdump".into());
    let replacement_url = storage.put_deploy(&replacement).await.unwrap().unwrap();

    alter(
        &storage,
        &package,
        &[],
        AlterCommand::SetUrl {
            url: replacement_url,
        },
    )
    .await
    .unwrap();

    let root = root_of(&storage, &package).await;
    assert_eq!(root.timestamp, 2);
    let token_step = &root.state["deploy.Token"];
    assert_eq!(token_step.chain_dump, None);
    assert_eq!(token_step.artifacts.contracts["Token"].deploy_txn_hash, None);

    let import = &root.state["clone.child"].artifacts.imports["child"];
    assert_eq!(import.url, newer_child_url);
    assert_eq!(import.artifacts.contracts["Token"].address, ADDRESS);
}

// ─── import ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_import_deploy_step_records_address_and_hash() {
    let (storage, _, _) = memory_storage();
    let (package, _) = publish_tree(&storage).await;

    let command = AlterCommand::Import {
        step: "deploy.Token".into(),
        targets: vec![ADDRESS.into()],
    };
    alter(&storage, &package, &[], command).await.unwrap();

    let root = root_of(&storage, &package).await;
    let step = &root.state["deploy.Token"];
    let config = root.def.step("deploy.Token").unwrap();
    assert_eq!(
        step.hash,
        Some(DefaultActions.step_hash("deploy.Token", config).unwrap())
    );
    assert_eq!(step.artifacts.contracts["Token"].address, ADDRESS);
    assert_eq!(step.artifacts.contracts["Token"].deploy_txn_hash, None);
}

#[tokio::test]
async fn test_import_var_step() {
    let (storage, _, _) = memory_storage();
    let mut root = deployment("root", 1);
    root.def
        .actions
        .insert("var".into(), json!({ "cfg": { "defaultValue": "1" } }));
    publish(&storage, "root:1.0.0", &root).await;
    let package = PackageReference::parse("root:1.0.0").unwrap();

    let command = AlterCommand::Import {
        step: "var.cfg".into(),
        targets: vec!["fee=30".into(), "owner=alice".into()],
    };
    alter(&storage, &package, &[], command).await.unwrap();

    let root = root_of(&storage, &package).await;
    let extras = &root.state["var.cfg"].artifacts.extras;
    assert_eq!(extras["fee"], "30");
    assert_eq!(extras["owner"], "alice");
}

#[tokio::test]
async fn test_import_unsupported_kind() {
    let (storage, _, _) = memory_storage();
    let mut root = deployment("root", 1);
    root.def
        .actions
        .insert("invoke".into(), json!({ "mint": { "target": ["Token"] } }));
    publish(&storage, "root:1.0.0", &root).await;
    let package = PackageReference::parse("root:1.0.0").unwrap();

    let command = AlterCommand::Import {
        step: "invoke.mint".into(),
        targets: vec![],
    };
    let err = alter(&storage, &package, &[], command).await.unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
}

#[test]
fn test_step_hash_depends_on_config() {
    let a = DefaultActions
        .step_hash("deploy.Token", &json!({"artifact": "Token"}))
        .unwrap();
    let b = DefaultActions
        .step_hash("deploy.Token", &json!({"artifact": "Other"}))
        .unwrap();
    assert_eq!(a.len(), 64);
    assert_ne!(a, b);
}

// ─── migrate-212 ───────────────────────────────────────────────────

/// Rewrite a fixture into the pre-2.12 layout.
fn legacy(mut info: DeploymentInfo) -> DeploymentInfo {
    if let Some(step) = info.state.remove("deploy.Token") {
        info.state.insert("contract.Token".into(), step);
    }
    info.def.rename_action("deploy", "contract");
    info
}

#[tokio::test]
async fn test_migrate_212_renames_nested_first() {
    let (storage, _, _) = memory_storage();

    let child = legacy(deployment("child", 1));
    let child_url = storage.put_deploy(&child).await.unwrap().unwrap();
    let mut root = legacy(deployment("root", 1));
    add_import(&mut root, "child", &child_url, &child);
    let step = root.state.remove("clone.child").unwrap();
    root.state.insert("provision.child".into(), step);
    root.def.rename_action("clone", "provision");
    publish(&storage, "root:1.0.0", &root).await;
    let package = PackageReference::parse("root:1.0.0").unwrap();

    alter(&storage, &package, &[], AlterCommand::Migrate212)
        .await
        .unwrap();

    let root = root_of(&storage, &package).await;
    let labels: Vec<&str> = root.state.keys().map(String::as_str).collect();
    assert_eq!(labels, vec!["clone.child", "deploy.Token"]);
    assert!(root.def.actions.contains_key("deploy"));
    assert!(root.def.actions.contains_key("clone"));
    assert!(!root.def.actions.contains_key("contract"));
    assert!(!root.def.actions.contains_key("provision"));

    let import = &root.state["clone.child"].artifacts.imports["child"];
    assert_ne!(import.url, child_url);
    let migrated_child: DeploymentInfo = storage.read_blob(&import.url).await.unwrap();
    assert!(migrated_child.state.contains_key("deploy.Token"));
    assert!(!migrated_child.state.contains_key("contract.Token"));
    assert_eq!(import.artifacts, migrated_child.artifacts());
}

#[tokio::test]
async fn test_migrate_212_refuses_to_overwrite_existing_step() {
    let (storage, _, registry) = memory_storage();
    let mut root = legacy(deployment("root", 1));
    let current = root.state["contract.Token"].clone();
    root.state.insert("deploy.Token".into(), current);
    let url = publish(&storage, "root:1.0.0", &root).await;
    let package = PackageReference::parse("root:1.0.0").unwrap();
    let published = registry.publishes();

    let err = alter(&storage, &package, &[], AlterCommand::Migrate212)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)), "{err}");
    assert!(err.to_string().contains("deploy.Token"));
    assert_eq!(registry.publishes(), published);
    assert_eq!(storage.resolve_url(&package, CHAIN).await.unwrap(), Some(url));
}

#[test]
fn test_legacy_definition_collision_is_rejected() {
    let mut info = deployment("root", 1);
    info.def
        .actions
        .insert("contract".into(), json!({ "Token": { "artifact": "Old" } }));
    let err = commands::rename_legacy_steps(&mut info).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    // Nothing was renamed.
    assert!(info.def.actions.contains_key("contract"));
    assert_eq!(info.def.step("deploy.Token").unwrap()["artifact"], "Token");
}
