//! Context bundle assembly.

use anyhow::{Context, Result};
use colored::Colorize;
use strata_sdk::{BuildRequest, ContextBundle, Strata};

use crate::cli::ContextArgs;
use crate::commands::entry::preview;

pub async fn execute(args: ContextArgs, strata: &Strata) -> Result<()> {
    let mut request = BuildRequest::new(&args.purpose);
    if let Some(query) = args.query {
        request = request.with_query(query);
    }
    if let Some(owner) = args.owner {
        request = request.for_owner(owner);
    }
    if let Some(max_tokens) = args.max_tokens {
        request = request.with_max_tokens(max_tokens);
    }
    for source in args.required_sources {
        request = request.require_source(source);
    }

    let bundle = strata
        .assembler()
        .build(request)
        .await
        .with_context(|| format!("Failed to build context for '{}'", args.purpose))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&bundle)?);
        return Ok(());
    }

    print_bundle(&bundle);
    Ok(())
}

fn print_bundle(bundle: &ContextBundle) {
    let meta = &bundle.metadata;
    println!("{}", format!("Context: {}", bundle.purpose).cyan().bold());
    println!("{}", "─".repeat(50));
    println!(
        "  {} entries, {} tokens from {}",
        bundle.entries.len(),
        meta.total_tokens,
        if meta.sources_used.is_empty() {
            "no sources".to_string()
        } else {
            meta.sources_used.join(", ")
        }
    );
    if meta.dropped_entries > 0 {
        println!("  {} candidates dropped", meta.dropped_entries);
    }
    if meta.compression_applied {
        println!("  {}", "compressed to fit the budget".yellow());
    }
    for failure in &meta.source_failures {
        println!("  {} {}: {}", "✗".red(), failure.source_id, failure.error);
    }
    println!();

    for (i, entry) in bundle.entries.iter().enumerate() {
        println!(
            "{}. {} {}",
            i + 1,
            format!("[{} {:.2}]", entry.source_id, entry.score).cyan(),
            preview(&entry.text(), 160)
        );
    }
}
