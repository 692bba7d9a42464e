//! Tier health check.

use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use strata_sdk::Strata;
use strata_sdk::coordinator::{HealthKind, HealthStatus};

pub async fn execute(deep: bool, metrics: bool, json: bool, strata: &Strata) -> Result<()> {
    let kind = if deep { HealthKind::Deep } else { HealthKind::Quick };
    let report = strata
        .coordinator()
        .health_check(kind, metrics)
        .await
        .context("Health check failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", "Strata Health".cyan().bold());
    println!("{}", "─".repeat(50));
    println!("  Overall: {}", status_label(report.status));
    println!();

    for tier in &report.tiers {
        let size = match tier.capacity {
            Some(capacity) => format!("{}/{}", tier.items, capacity),
            None => tier.items.to_string(),
        };
        print!("  {:<8} {}  {} items, {}ms", tier.tier.as_str(), status_label(tier.status), size, tier.latency_ms);
        match &tier.error {
            Some(error) => println!("  {}", error.red()),
            None => println!(),
        }
    }

    if let Some(m) = &report.metrics {
        println!();
        println!("  Operations: {} ok, {} failed, {} retries", m.operations_completed, m.operations_failed, m.retries);
        println!("  Avg latency: {:.1}ms", m.average_latency_ms);
        println!("  Syncs: {} ({} active)  Partitions: {}", m.sync_count, m.active_syncs, m.partition_count);
    }

    Ok(())
}

fn status_label(status: HealthStatus) -> ColoredString {
    match status {
        HealthStatus::Healthy => "✓ healthy".green(),
        HealthStatus::Degraded => "○ degraded".yellow(),
        HealthStatus::Unavailable => "✗ unavailable".red(),
    }
}
