//! Entry commands against the durable tier.
//!
//! Writes are buffered by the durable tier and reach SQLite when the
//! command exits; search only sees flushed entries, which is every entry
//! stored by an earlier invocation.

use anyhow::{Context, Result, bail};
use colored::Colorize;
use serde_json::{Map, Value};
use std::time::Duration;
use strata_sdk::{MemoryEntry, MemoryType, MemoryVersion, SearchQuery, Strata};

use crate::cli::{SearchArgs, StoreArgs, UpdateArgs};

/// Characters of content shown per entry in listings.
const PREVIEW_CHARS: usize = 120;

/// Store a new entry.
pub async fn store(args: StoreArgs, strata: &Strata) -> Result<()> {
    let entry_type: MemoryType = args.entry_type.parse()?;
    let content = if args.json_content {
        serde_json::from_str(&args.content).context("Content is not valid JSON")?
    } else {
        Value::String(args.content)
    };

    let mut entry = MemoryEntry::new(entry_type, args.owner, content);
    if let Some(id) = args.id {
        entry = entry.with_id(id);
    }
    if let Some(session) = args.session {
        entry = entry.with_session(session);
    }
    for tag in args.tags {
        entry = entry.with_tag(tag);
    }
    for pair in &args.metadata {
        let (key, value) = parse_assignment(pair)?;
        entry = entry.with_metadata(key, value.unwrap_or(Value::Null));
    }
    if let Some(ttl) = args.ttl {
        entry = entry.with_ttl(Duration::from_secs(ttl));
    }

    let id = entry.id.clone();
    strata.durable().store(entry).await.context("Failed to store entry")?;

    println!("{} Stored {} entry", "✓".green(), entry_type.to_string().cyan());
    println!("  ID: {}", id);
    Ok(())
}

/// Show one entry.
pub async fn get(id: &str, include_deleted: bool, json: bool, strata: &Strata) -> Result<()> {
    let entry = if include_deleted {
        strata.durable().get_including_deleted(id).await
    } else {
        strata.durable().get(id).await
    }
    .with_context(|| format!("Failed to get entry {}", id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
        return Ok(());
    }

    print_entry_detail(&entry);
    Ok(())
}

/// Search stored entries.
pub async fn search(args: SearchArgs, strata: &Strata) -> Result<()> {
    let mut query = SearchQuery::text(&args.query).page(args.limit, args.offset);
    if let Some(owner) = args.owner {
        query = query.with_owner(owner);
    }
    if let Some(entry_type) = args.entry_type {
        query = query.with_type(entry_type.parse()?);
    }

    let page = strata.durable().search(query).await.context("Search failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    if page.entries.is_empty() {
        println!("{} No entries match '{}'", "⚠".yellow(), args.query);
        return Ok(());
    }

    println!(
        "{} Showing {}-{} of {} entries:",
        "✓".green(),
        page.offset + 1,
        page.offset + page.entries.len(),
        page.total
    );
    println!();
    for (i, entry) in page.entries.iter().enumerate() {
        print_entry_line(page.offset + i + 1, entry);
    }
    Ok(())
}

/// Apply field changes as a new version.
pub async fn update(args: UpdateArgs, strata: &Strata) -> Result<()> {
    let mut changes = Map::new();
    for pair in &args.changes {
        let (field, value) = parse_assignment(pair)?;
        changes.insert(field, value.unwrap_or(Value::Null));
    }

    let entry = strata
        .durable()
        .update(&args.id, changes, args.reason, args.author)
        .await
        .with_context(|| format!("Failed to update entry {}", args.id))?;

    println!("{} Updated {} to version {}", "✓".green(), entry.id, entry.version.to_string().cyan());
    Ok(())
}

/// Restore an earlier version.
pub async fn rollback(id: &str, version: u64, author: &str, strata: &Strata) -> Result<()> {
    let entry = strata
        .durable()
        .rollback(id, version, author)
        .await
        .with_context(|| format!("Failed to roll back entry {} to version {}", id, version))?;

    println!(
        "{} Rolled back {} to the content of version {} (now version {})",
        "✓".green(),
        entry.id,
        version,
        entry.version.to_string().cyan()
    );
    Ok(())
}

/// Show version history, newest first.
pub async fn history(id: &str, json: bool, strata: &Strata) -> Result<()> {
    let versions = strata
        .durable()
        .history(id)
        .await
        .with_context(|| format!("Failed to read history of {}", id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&versions)?);
        return Ok(());
    }

    if versions.is_empty() {
        println!("{} {} has no recorded changes", "⚠".yellow(), id);
        return Ok(());
    }

    println!("{} {} versions of {}:", "✓".green(), versions.len(), id);
    println!();
    for version in versions.iter().rev() {
        print_version(version);
    }
    Ok(())
}

/// Soft or hard delete.
pub async fn delete(id: &str, hard: bool, strata: &Strata) -> Result<()> {
    let deleted = if hard {
        strata.durable().hard_delete(id).await
    } else {
        strata.durable().soft_delete(id).await
    };
    deleted.with_context(|| format!("Failed to delete entry {}", id))?;

    let how = if hard { "Removed" } else { "Deleted" };
    println!("{} {} {}", "✓".green(), how, id);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing & output
// ─────────────────────────────────────────────────────────────────────────────

/// Split `field=value`. The value is parsed as JSON when it is valid JSON and
/// kept as a string otherwise; an empty value means "clear".
pub fn parse_assignment(pair: &str) -> Result<(String, Option<Value>)> {
    let Some((field, raw)) = pair.split_once('=') else {
        bail!("Expected field=value, got '{}'", pair);
    };
    let field = field.trim();
    if field.is_empty() {
        bail!("Missing field name in '{}'", pair);
    }
    if raw.is_empty() {
        return Ok((field.to_string(), None));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((field.to_string(), Some(value)))
}

/// First `max` characters of the entry's text on one line.
pub fn preview(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut)
}

fn print_entry_line(n: usize, entry: &MemoryEntry) {
    println!(
        "{}. [{}] {} {}",
        n,
        entry.entry_type.to_string().cyan(),
        preview(&entry.text(), PREVIEW_CHARS),
        format!("(v{})", entry.version).dimmed()
    );
    println!("   ID: {}  owner: {}", entry.id.dimmed(), entry.owner_id);
    if !entry.tags.is_empty() {
        let tags: Vec<&str> = entry.tags.iter().map(String::as_str).collect();
        println!("   Tags: {}", tags.join(", "));
    }
    println!();
}

fn print_entry_detail(entry: &MemoryEntry) {
    let title = format!("{} ({})", entry.id, entry.entry_type);
    println!("{}", title.cyan().bold());
    println!("{}", "─".repeat(50));
    println!("  Owner:    {}", entry.owner_id);
    if let Some(session) = &entry.session_id {
        println!("  Session:  {}", session);
    }
    println!("  Version:  {}", entry.version);
    println!("  Created:  {}", entry.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated:  {}", entry.updated_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(ttl) = entry.ttl_secs {
        println!("  TTL:      {}s", ttl);
    }
    if !entry.tags.is_empty() {
        let tags: Vec<&str> = entry.tags.iter().map(String::as_str).collect();
        println!("  Tags:     {}", tags.join(", "));
    }
    if entry.deleted {
        println!("  Status:   {}", "deleted".red());
    }
    if !entry.metadata.is_empty() {
        println!("  Metadata:");
        for (key, value) in &entry.metadata {
            println!("    {}: {}", key, value);
        }
    }
    println!();
    println!("{}", entry.text());
}

fn print_version(version: &MemoryVersion) {
    println!(
        "  v{} {} by {}: {}",
        version.version.to_string().cyan(),
        version.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
        version.author,
        version.reason
    );
    for (field, change) in &version.changes {
        let show = |v: &Option<Value>| v.as_ref().map_or_else(|| "∅".to_string(), |v| preview(&v.to_string(), 60));
        println!("      {}: {} → {}", field, show(&change.old), show(&change.new));
    }
}
