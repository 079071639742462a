use anyhow::Result;
use cask::alter::{AlterCommand, AlterEngine, DefaultActions};
use cask::PackageReference;
use clap::Args;

use super::GlobalArgs;

#[derive(Args, Debug)]
pub struct AlterArgs {
    /// Package reference (name[:version][@preset])
    pub package: String,
    /// Chain the deployment lives on
    #[arg(long)]
    pub chain_id: u64,
    /// Subpackage path, one import step label per level (clone.a,clone.b)
    #[arg(long, value_delimiter = ',')]
    pub subpkg: Vec<String>,
    /// set-url, set-misc, set-contract-address, import, mark-complete,
    /// mark-incomplete, clean-unused or migrate-212
    pub command: String,
    /// Command arguments
    pub targets: Vec<String>,
}

pub async fn execute(args: AlterArgs, global: &GlobalArgs) -> Result<()> {
    let package = PackageReference::parse(&args.package)?;
    let command = AlterCommand::parse(&args.command, &args.targets)?;
    let storage = global.storage()?;
    let builder = DefaultActions;

    let outcome = AlterEngine::new(&storage, &builder)
        .alter(&package, args.chain_id, &args.subpkg, &command)
        .await?;

    eprintln!("Altered {} ({})", package, command);
    eprintln!("  old root: {}", outcome.old_root_url);
    eprintln!("  new root: {}", outcome.new_root_url);
    for receipt in &outcome.receipts {
        eprintln!("  published: {}", receipt);
    }
    println!("{}", outcome.new_root_url);
    Ok(())
}
