//! # Slobridge
//!
//! Chat bridge relaying messages and presence between rooms on different
//! networks.
//!
//! ## Usage
//!
//! ```bash
//! # Run with a YAML configuration
//! slobridge --config /etc/slobridge/slobridge.yaml
//!
//! # Validate a configuration and exit
//! slobridge --config slobridge.toml --check
//!
//! # Override a setting from the environment
//! SLOBRIDGE__BRIDGE__SEND_TIMEOUT_MS=5000 slobridge
//! ```

mod app;
mod metrics;
mod settings;
mod status;

use anyhow::{Context, Result};
use clap::Parser;
use settings::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "slobridge=info,slobridge_core=info,slobridge_endpoint=info";

#[derive(Parser)]
#[command(name = "slobridge")]
#[command(version, about = "Chat bridge relaying messages and presence between networks")]
struct Cli {
    /// Configuration file (YAML, TOML or JSON).
    #[arg(short, long, default_value = "~/.config/slobridge/slobridge.yaml")]
    config: String,

    /// Log filter, overriding RUST_LOG.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = match &cli.log_level {
        Some(level) => tracing_subscriber::EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log filter '{level}'"))?,
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| DEFAULT_FILTER.into()),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = Settings::load(&cli.config)?;
    let config = settings.bridge_config();
    config.validate().context("Invalid configuration")?;

    if cli.check {
        tracing::info!(
            sockets = config.sockets.len(),
            routes = config.routes.len(),
            "Configuration is valid"
        );
        return Ok(());
    }

    tracing::info!(
        config = %cli.config,
        sockets = config.sockets.len(),
        routes = config.routes.len(),
        "Starting slobridge"
    );

    app::run(settings).await
}
