//! strata - Tiered memory CLI
//!
//! Local front end to the fast/warm/durable memory tiers, the context
//! assembler, and the tier coordinator.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod commands;
mod config;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("strata=info".parse()?))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let (config, paths) = config::load()?;

    // Execute command
    match cli.command {
        Commands::Config { path } => commands::config::execute(&config, &paths, path),
        Commands::Version => {
            println!("strata {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => commands::execute(command, config).await,
    }
}
