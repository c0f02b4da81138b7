//! Credential management commands.

use console::style;

use crate::config::{Config, Settings};
use crate::models::{mask_secret, Credentials};

use super::open_coordinator;

/// Store credentials; omitted values are left as they were.
pub async fn cmd_credentials_set(
    settings: &Settings,
    config: &Config,
    query_id: Option<String>,
    bearer: Option<String>,
    csrf: Option<String>,
) -> anyhow::Result<()> {
    if query_id.is_none() && bearer.is_none() && csrf.is_none() {
        println!(
            "{} Nothing to set. Pass --query-id, --bearer or --csrf.",
            style("!").yellow()
        );
        return Ok(());
    }

    let coordinator = open_coordinator(settings, config).await?;
    coordinator
        .credentials_updated(Credentials {
            query_id,
            bearer_token: bearer,
            csrf_token: csrf,
        })
        .await;

    let ready = coordinator.is_ready();
    coordinator.shutdown();

    println!("{} Credentials saved", style("✓").green());
    if !ready {
        println!(
            "  {} query id and bearer token are both needed before lookups can run",
            style("!").yellow()
        );
    }
    Ok(())
}

/// Show stored credentials with secrets masked.
pub async fn cmd_credentials_show(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    let coordinator = open_coordinator(settings, config).await?;
    let credentials = coordinator.credentials();
    coordinator.shutdown();

    let show = |value: &Option<String>, secret: bool| match value {
        Some(v) if secret => mask_secret(v),
        Some(v) => v.clone(),
        None => style("(not set)").dim().to_string(),
    };

    println!("\n{}", style("Credentials").bold());
    println!("{}", "-".repeat(40));
    println!("{:<20} {}", "Query id:", show(&credentials.query_id, false));
    println!("{:<20} {}", "Bearer token:", show(&credentials.bearer_token, true));
    println!("{:<20} {}", "CSRF token:", show(&credentials.csrf_token, true));
    println!(
        "{:<20} {}",
        "Ready:",
        if credentials.is_ready() {
            style("yes").green().to_string()
        } else {
            style("no").yellow().to_string()
        }
    );
    Ok(())
}
