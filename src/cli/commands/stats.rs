//! Statistics and wipe commands.

use console::style;

use crate::cli::helpers::{format_bytes, format_duration_ms};
use crate::config::{Config, Settings};
use crate::models::CoordinatorStatus;

use super::open_coordinator;

/// Show queue, lockout and cache statistics.
pub async fn cmd_stats(settings: &Settings, config: &Config, json: bool) -> anyhow::Result<()> {
    let coordinator = open_coordinator(settings, config).await?;
    let stats = coordinator.stats().await;
    coordinator.shutdown();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("\n{}", style("Whereabouts Status").bold());
    println!("{}", "-".repeat(40));

    let status = match stats.status {
        CoordinatorStatus::Active => style("Active").green().to_string(),
        CoordinatorStatus::RateLimited => style("Rate limited").red().to_string(),
    };
    println!("{:<20} {}", "Status:", status);
    if stats.status == CoordinatorStatus::RateLimited {
        println!(
            "{:<20} {}",
            "Lockdown:",
            format_duration_ms(stats.lockdown_remaining_ms)
        );
    }
    println!("{:<20} {}", "Quota:", stats.quota);
    println!(
        "{:<20} {} (max {})",
        "Queue:", stats.queue_length, stats.max_queue_observed
    );
    println!(
        "{:<20} {}",
        "Next up:",
        stats.next_key.as_deref().unwrap_or("None")
    );
    println!("{:<20} {}", "Fetched (session):", stats.session_fetch_count);
    println!("{:<20} {}", "Cached accounts:", stats.total_cached_count);
    println!("{:<20} {}", "Cache size:", format_bytes(stats.cache_size_bytes));
    println!(
        "{:<20} {}",
        "Credentials:",
        if coordinator.is_ready() {
            style("ready").green().to_string()
        } else {
            style("incomplete").yellow().to_string()
        }
    );

    if !stats.top_values.is_empty() {
        println!("\n{}", style("Top countries").bold());
        for value in &stats.top_values {
            println!("  {:<24} {}", value.name, value.count);
        }
    }

    Ok(())
}

/// Delete cached lookups, keeping credentials and lockout state.
pub async fn cmd_wipe(settings: &Settings, config: &Config, confirm: bool) -> anyhow::Result<()> {
    let coordinator = open_coordinator(settings, config).await?;

    if !confirm {
        let cached = coordinator.stats().await.total_cached_count;
        coordinator.shutdown();
        println!(
            "{} This will delete {} cached lookups.",
            style("!").yellow(),
            cached
        );
        println!("  Credentials and lockout state are kept.");
        println!("  Use --confirm to proceed.");
        return Ok(());
    }

    coordinator.wipe().await;
    coordinator.shutdown();
    println!("{} Cache cleared", style("✓").green());
    Ok(())
}
