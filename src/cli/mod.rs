pub mod alter;
pub mod fetch;
pub mod inspect;
pub mod prune;
pub mod settings;

use std::path::PathBuf;

use anyhow::{Context, Result};
use cask::{ContentUrl, DeploymentInfo, Settings, SettingsSource, Storage};
use clap::Args;
use serde::Serialize;

/// Store location and backends. Unset flags fall back to the `CASK_*`
/// environment variables.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Data directory (default: ~/.local/share/cask)
    #[arg(long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
    /// IPFS HTTP API used for reads
    #[arg(long, global = true, value_name = "URL")]
    pub ipfs_url: Option<String>,
    /// IPFS HTTP API used for writes
    #[arg(long, global = true, value_name = "URL")]
    pub publish_ipfs_url: Option<String>,
    /// Remote registry
    #[arg(long, global = true, value_name = "URL")]
    pub registry_url: Option<String>,
    /// Which registry answers first: local or remote
    #[arg(long, global = true)]
    pub registry_priority: Option<String>,
    /// Scheme new blobs are written with: file or ipfs
    #[arg(long, global = true)]
    pub write_scheme: Option<String>,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl GlobalArgs {
    /// Values given on the command line. Empty values count as unset.
    pub fn source(&self) -> SettingsSource {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        SettingsSource {
            data_dir: self.directory.clone(),
            ipfs_url: non_empty(&self.ipfs_url),
            publish_ipfs_url: non_empty(&self.publish_ipfs_url),
            registry_url: non_empty(&self.registry_url),
            registry_priority: non_empty(&self.registry_priority),
            write_scheme: non_empty(&self.write_scheme),
        }
    }

    pub fn settings(&self) -> Result<Settings> {
        let source = self.source().or(SettingsSource::from_env());
        Settings::resolve(source).context("invalid settings")
    }

    pub fn storage(&self) -> Result<Storage> {
        self.settings()?
            .storage()
            .context("cannot open package storage")
    }
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    println!("{}", text);
    Ok(())
}

/// One-line-per-field summary of a deployment, as printed by `fetch` and
/// `inspect`.
pub fn print_summary(url: Option<&ContentUrl>, info: &DeploymentInfo) {
    let artifacts = info.artifacts();
    if let Some(url) = url {
        println!("  url:       {}", url);
    }
    println!("  package:   {}:{}", info.def.name, info.def.version);
    if let Some(preset) = &info.def.preset {
        println!("  preset:    {}", preset);
    }
    println!("  chain id:  {}", info.chain_id);
    println!("  status:    {:?}", info.status);
    println!("  timestamp: {}", info.timestamp);
    println!(
        "  generator: {}",
        info.generator.as_deref().unwrap_or("(none)")
    );
    println!("  misc:      {}", info.misc_url);
    println!("  steps:     {}", info.state.len());
    for (name, contract) in &artifacts.contracts {
        println!("    contract {:<20} {}", name, contract.address);
    }
    for (name, import) in &artifacts.imports {
        println!("    import   {:<20} {}", name, import.url);
    }
}
