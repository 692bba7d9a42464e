//! Command implementations.
//!
//! Each command runs against a [`Strata`] opened over the local database.
//! Shutdown always runs so buffered durable writes reach disk even when the
//! command itself failed.

pub mod config;
pub mod context;
pub mod entry;
pub mod health;

use anyhow::{Context, Result};
use colored::Colorize;
use strata_sdk::{Strata, StrataConfig};

use crate::cli::Commands;
use crate::config::ensure_database_dir;

/// Open the database, run `command`, then flush and stop.
pub async fn execute(command: Commands, config: StrataConfig) -> Result<()> {
    ensure_database_dir(&config.database_path)?;
    let mut strata = Strata::open(config).context("Failed to open memory store")?;

    let result = run(command, &strata).await;

    let report = strata.shutdown().await.context("Failed to flush pending writes")?;
    for failed in &report.failed {
        eprintln!(
            "{} {} {} entries still buffered: {}",
            "⚠".yellow(),
            failed.entries,
            failed.entry_type,
            failed.error
        );
    }
    result
}

async fn run(command: Commands, strata: &Strata) -> Result<()> {
    match command {
        Commands::Store(args) => entry::store(args, strata).await,
        Commands::Get {
            id,
            include_deleted,
            json,
        } => entry::get(&id, include_deleted, json, strata).await,
        Commands::Search(args) => entry::search(args, strata).await,
        Commands::Update(args) => entry::update(args, strata).await,
        Commands::Rollback { id, version, author } => entry::rollback(&id, version, &author, strata).await,
        Commands::History { id, json } => entry::history(&id, json, strata).await,
        Commands::Delete { id, hard } => entry::delete(&id, hard, strata).await,
        Commands::Context(args) => context::execute(args, strata).await,
        Commands::Health { deep, metrics, json } => health::execute(deep, metrics, json, strata).await,
        Commands::Config { .. } | Commands::Version => Ok(()),
    }
}
