//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod credentials;
mod import;
mod lookup;
mod stats;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, Config, LoadOptions, Settings};
use crate::coordinator::Coordinator;
use crate::store::SqliteStore;
use crate::upstream::HttpTransport;

#[derive(Parser)]
#[command(name = "whereabouts")]
#[command(about = "Rate-limited account location lookups with a persistent cache")]
#[command(version)]
pub struct Cli {
    /// Data directory or database file (overrides config file).
    #[arg(long, short = 'd', global = true)]
    data: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true, env = "WHEREABOUTS_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Look up one or more accounts
    Lookup {
        /// Account handles (with or without a leading @)
        #[arg(required = true)]
        handles: Vec<String>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read handles from stdin, one per line, and print results as they settle
    Watch {
        /// Print one JSON object per line
        #[arg(long)]
        json: bool,
    },

    /// Show queue, lockout and cache statistics
    Stats {
        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete all cached lookups (credentials and lockout state are kept)
    Wipe {
        /// Confirm the wipe
        #[arg(long)]
        confirm: bool,
    },

    /// Manage upstream credentials
    Credentials {
        #[command(subcommand)]
        command: CredentialsCommands,
    },

    /// Import a JSON dump of cached entries from an older release
    Import {
        /// Dump file (a JSON object of storage keys to values)
        file: PathBuf,
        /// Parse and report without writing anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum CredentialsCommands {
    /// Store credentials; omitted values are left unchanged
    Set {
        /// GraphQL query id for the account-about operation
        #[arg(long)]
        query_id: Option<String>,
        /// Authorization header value
        #[arg(long)]
        bearer: Option<String>,
        /// Session CSRF token
        #[arg(long)]
        csrf: Option<String>,
    },
    /// Show stored credentials (masked)
    Show,
}

/// Open the store and start a coordinator over it.
pub(crate) async fn open_coordinator(
    settings: &Settings,
    config: &Config,
) -> anyhow::Result<Coordinator> {
    settings.ensure_directories()?;
    let store = Arc::new(SqliteStore::open(&settings.database_path())?);
    let coordinator_config = config.coordinator_config()?;
    let transport = Arc::new(HttpTransport::new(
        config.upstream.user_agent.as_deref(),
        coordinator_config.fetch_timeout,
    )?);
    Ok(Coordinator::init(coordinator_config, store, transport).await)
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data: cli.data,
    };
    let (settings, config) = load_settings_with_options(options).await?;
    tracing::debug!("Using database {}", settings.database_path().display());

    match cli.command {
        Commands::Lookup { handles, json } => {
            lookup::cmd_lookup(&settings, &config, &handles, json).await
        }
        Commands::Watch { json } => lookup::cmd_watch(&settings, &config, json).await,
        Commands::Stats { json } => stats::cmd_stats(&settings, &config, json).await,
        Commands::Wipe { confirm } => stats::cmd_wipe(&settings, &config, confirm).await,
        Commands::Credentials { command } => match command {
            CredentialsCommands::Set {
                query_id,
                bearer,
                csrf,
            } => credentials::cmd_credentials_set(&settings, &config, query_id, bearer, csrf).await,
            CredentialsCommands::Show => {
                credentials::cmd_credentials_show(&settings, &config).await
            }
        },
        Commands::Import { file, dry_run } => {
            import::cmd_import(&settings, &file, dry_run).await
        }
    }
}
