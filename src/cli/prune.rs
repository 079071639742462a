use anyhow::{bail, Result};
use cask::package::unix_timestamp;
use cask::prune::{PruneOptions, Pruner};
use cask::reference::parse_variant;
use clap::Args;

use super::GlobalArgs;

#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Only keep registry entries for this package name
    #[arg(long)]
    pub filter_package: Option<String>,
    /// Only keep registry entries for this variant (<chainId>-<preset>)
    #[arg(long)]
    pub filter_variant: Option<String>,
    /// Keep records younger than this many seconds
    #[arg(long, default_value_t = 0)]
    pub keep_age: u64,
    /// Delete the candidates instead of listing them
    #[arg(long)]
    pub delete: bool,
}

pub async fn execute(args: PruneArgs, global: &GlobalArgs) -> Result<()> {
    if let Some(variant) = &args.filter_variant {
        if parse_variant(variant).is_none() {
            bail!("variant '{}' is not <chainId>-<preset>", variant);
        }
    }
    let storage = global.storage()?;
    let pruner = Pruner::new(&storage);
    let options = PruneOptions {
        filter_package: args.filter_package,
        filter_variant: args.filter_variant,
        keep_age: args.keep_age,
    };

    let report = pruner.calculate(&options, unix_timestamp()).await?;
    for url in &report.candidates {
        println!("{}", url);
    }
    eprintln!("{}", report.stats);

    if args.delete {
        let deleted = pruner.delete(&report.candidates).await?;
        eprintln!("Deleted {} blob(s)", deleted);
    } else if !report.candidates.is_empty() {
        eprintln!("Dry run; pass --delete to remove these blobs");
    }
    Ok(())
}
