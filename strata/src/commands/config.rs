//! Show the effective configuration.

use anyhow::{Context, Result};
use colored::Colorize;
use strata_sdk::StrataConfig;

use crate::config::Paths;

pub fn execute(config: &StrataConfig, paths: &Paths, path_only: bool) -> Result<()> {
    if path_only {
        println!("{}", paths.config_file.display());
        return Ok(());
    }

    let source = if paths.config_file.exists() {
        paths.config_file.display().to_string()
    } else {
        format!("defaults ({} not found)", paths.config_file.display())
    };
    println!("{} {}", "#".dimmed(), format!("source: {}", source).dimmed());
    println!(
        "{}",
        config.to_toml_string().context("Failed to render configuration")?
    );
    Ok(())
}
