//! castlefinder CLI: collect castles from every known source, reconcile
//! them against the local store and persist the result.

mod commands;
mod serve;

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
