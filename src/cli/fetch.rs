use std::sync::Arc;

use anyhow::{bail, Result};
use cask::resolve::ImportResolver;
use cask::PackageReference;
use clap::Args;
use serde_json::json;
use tracing::info;

use super::{print_json, print_summary, GlobalArgs};

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Package reference (name[:version][@preset])
    pub package: String,
    /// Chain the deployment lives on
    #[arg(long)]
    pub chain_id: u64,
    /// Maximum concurrent blob fetches
    #[arg(long, default_value_t = cask::resolve::DEFAULT_CONCURRENCY)]
    pub concurrency: usize,
    /// Print the resolved tree as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: FetchArgs, global: &GlobalArgs) -> Result<()> {
    let package = PackageReference::parse(&args.package)?;
    let storage = Arc::new(global.storage()?);

    let (chain_id, root) = storage
        .read_deploy_with_fallback(&package, args.chain_id)
        .await?;
    if chain_id != args.chain_id {
        eprintln!(
            "warning: {} not found on chain {}, using local chain {}",
            package, args.chain_id, chain_id
        );
    }

    let tree = ImportResolver::new(storage)
        .with_concurrency(args.concurrency)
        .resolve(root)
        .await?;
    info!(
        package = %package,
        chain_id,
        nested = tree.len(),
        failed = tree.failed.len(),
        "fetched package"
    );

    if args.json {
        print_json(&json!({
            "package": package.full_package_ref(),
            "chainId": chain_id,
            "root": tree.root,
            "imports": tree.deployments,
            "failed": tree.failed,
        }))?;
    } else {
        print_summary(None, &tree.root);
        println!("  nested:    {}", tree.len());
        for (url, reason) in &tree.failed {
            eprintln!("error: cannot fetch {}: {}", url, reason);
        }
    }

    if !tree.is_complete() {
        bail!("{} import(s) could not be fetched", tree.failed.len());
    }
    Ok(())
}
