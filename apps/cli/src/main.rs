//! TweakForge CLI: rebuilds tweaked iOS app archives from a catalog.
//!
//! For every app in the catalog it fetches the base archive and tweaks,
//! injects them, publishes the result, and records the download link.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
