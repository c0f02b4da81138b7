//! Lookup commands.

use console::style;
use futures::future::join_all;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::helpers::{normalize_handle, outcome_json, outcome_line};
use crate::config::{Config, Settings};

use super::open_coordinator;

/// Look up the given handles concurrently through one coordinator.
pub async fn cmd_lookup(
    settings: &Settings,
    config: &Config,
    handles: &[String],
    json: bool,
) -> anyhow::Result<()> {
    let handles: Vec<String> = handles.iter().filter_map(|h| normalize_handle(h)).collect();
    if handles.is_empty() {
        println!("{} No handles given", style("!").yellow());
        return Ok(());
    }

    let coordinator = open_coordinator(settings, config).await?;
    if !coordinator.is_ready() {
        eprintln!(
            "{} Credentials incomplete; uncached lookups will fail. See `whereabouts credentials set`.",
            style("!").yellow()
        );
    }

    let outcomes = join_all(handles.iter().map(|h| coordinator.lookup(h))).await;

    if json {
        let report: Vec<_> = handles
            .iter()
            .zip(&outcomes)
            .map(|(h, o)| outcome_json(h, o))
            .collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (handle, outcome) in handles.iter().zip(&outcomes) {
            println!("{}", outcome_line(handle, outcome));
        }
    }

    coordinator.shutdown();
    Ok(())
}

/// Read handles from stdin and print each result as soon as it settles.
pub async fn cmd_watch(settings: &Settings, config: &Config, json: bool) -> anyhow::Result<()> {
    let coordinator = open_coordinator(settings, config).await?;
    if !coordinator.is_ready() {
        eprintln!(
            "{} Credentials incomplete; uncached lookups will fail.",
            style("!").yellow()
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = Vec::new();

    while let Some(line) = lines.next_line().await? {
        let Some(handle) = normalize_handle(&line) else {
            continue;
        };
        let coordinator = coordinator.clone();
        tasks.push(tokio::spawn(async move {
            let outcome = coordinator.lookup(&handle).await;
            if json {
                println!("{}", outcome_json(&handle, &outcome));
            } else {
                println!("{}", outcome_line(&handle, &outcome));
            }
        }));
    }

    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!("Lookup task failed: {}", e);
        }
    }

    coordinator.shutdown();
    Ok(())
}
