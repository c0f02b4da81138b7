//! whereabouts - rate-limited, cached account location lookups.
//!
//! Thin command-line host over the library's coordinator.

mod cli;

// The CLI reaches library modules through `crate::`.
pub(crate) use whereabouts::{config, coordinator, models, store, upstream};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "whereabouts=info"
    } else {
        "whereabouts=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Run CLI
    cli::run().await
}
