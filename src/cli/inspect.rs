use anyhow::{Context, Result};
use cask::storage::LOCAL_CHAIN_ID;
use cask::{ContentUrl, DeploymentInfo, PackageReference};
use clap::Args;

use super::{print_json, print_summary, GlobalArgs};

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Package reference or content URL (ipfs://…, file://…)
    pub target: String,
    /// Chain to look the package up on
    #[arg(long, default_value_t = LOCAL_CHAIN_ID)]
    pub chain_id: u64,
    /// Print the raw manifest as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: InspectArgs, global: &GlobalArgs) -> Result<()> {
    let storage = global.storage()?;

    let (url, info): (ContentUrl, DeploymentInfo) = match ContentUrl::parse(&args.target) {
        Ok(url) => {
            let info = storage.read_blob(&url).await?;
            (url, info)
        }
        Err(_) => {
            let package = PackageReference::parse(&args.target)
                .with_context(|| format!("'{}' is neither a URL nor a package", args.target))?;
            storage
                .read_deploy_at(&package, args.chain_id)
                .await?
                .ok_or(cask::Error::PackageNotFound {
                    package: package.full_package_ref(),
                    chain_id: args.chain_id,
                })?
        }
    };

    if args.json {
        print_json(&info)
    } else {
        print_summary(Some(&url), &info);
        Ok(())
    }
}
