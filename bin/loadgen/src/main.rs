//! Command line front end for the `base-loadgen` engine.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod cli;
mod commands;
mod logging;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignores errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    cli.logging.init_tracing()?;

    match cli.command {
        Commands::Setup(args) => commands::setup(args).await,
        Commands::Run(args) => commands::run(args).await,
    }
}
