//! `cask` - inspect, fetch, prune and alter stored deployment packages.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;

#[derive(Parser)]
#[command(
    name = "cask",
    version,
    about = "Content-addressed store for deployment packages"
)]
struct Cli {
    #[command(flatten)]
    global: cli::GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a package and fetch every nested deployment it imports
    Fetch(cli::fetch::FetchArgs),
    /// Show a stored deployment by package reference or URL
    Inspect(cli::inspect::InspectArgs),
    /// List (and optionally delete) blobs no registry can reach
    Prune(cli::prune::PruneArgs),
    /// Mutate a stored deployment in place and republish it
    Alter(cli::alter::AlterArgs),
    /// Print the resolved settings
    Settings,
}

fn main() -> Result<()> {
    let Cli { global, command } = Cli::parse();

    let default_level = if global.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match command {
            Command::Fetch(args) => cli::fetch::execute(args, &global).await,
            Command::Inspect(args) => cli::inspect::execute(args, &global).await,
            Command::Prune(args) => cli::prune::execute(args, &global).await,
            Command::Alter(args) => cli::alter::execute(args, &global).await,
            Command::Settings => cli::settings::execute(&global),
        }
    })
}
