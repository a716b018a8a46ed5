//! # engage-cli
//!
//! Operator tool for the engage-sync asset cache and event queue.
//!
//! ## Commands
//!
//! - `sync`: Apply a campaign payload and download its assets
//! - `evaluate`: Show campaign eligibility against the local cache
//! - `prune`: Remove assets a payload no longer references
//! - `track`: Queue an event
//! - `flush`: Deliver queued events
//! - `status`: Show cache and queue status
//!
//! ## Example
//!
//! ```bash
//! # Download the assets of a sync response
//! engage-cli sync campaigns.json
//!
//! # Which campaigns could be shown an hour from now?
//! engage-cli evaluate campaigns.json --at 1767229200000
//!
//! # Queue and deliver an event
//! engage-cli track purchase --param sku=abc --param price=9.99
//! engage-cli --config engage.toml flush
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod http;

use commands::{evaluate, flush, prune, status, sync, track};

/// Operator tool for the engage-sync asset cache and event queue.
#[derive(Parser, Debug)]
#[command(name = "engage-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding the asset cache and event queue
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply a campaign payload and download its assets
    Sync {
        /// Campaign payload (JSON sync response)
        payload: PathBuf,

        /// Remove cached assets the payload no longer references
        #[arg(long)]
        prune: bool,
    },

    /// Show campaign eligibility against the local cache
    Evaluate {
        /// Campaign payload (JSON sync response)
        payload: PathBuf,

        /// Evaluation time in milliseconds since the epoch (default: now)
        #[arg(long)]
        at: Option<u64>,
    },

    /// Remove cached assets a payload no longer references
    Prune {
        /// Campaign payload (JSON sync response)
        payload: PathBuf,
    },

    /// Queue an event for delivery
    Track {
        /// Event type
        event_type: String,

        /// Event parameter as key=value (repeatable)
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Payload attribute as key=value (repeatable)
        #[arg(long = "payload", value_name = "KEY=VALUE")]
        payload: Vec<String>,
    },

    /// Deliver queued events to the collection endpoint
    Flush,

    /// Show cache and queue status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = config::load(cli.config.as_deref(), cli.data_dir)?;

    match cli.command {
        Commands::Sync { payload, prune } => {
            sync::run(config, &payload, prune).await?;
        }
        Commands::Evaluate { payload, at } => {
            evaluate::run(&config, &payload, at).await?;
        }
        Commands::Prune { payload } => {
            prune::run(&config, &payload).await?;
        }
        Commands::Track {
            event_type,
            params,
            payload,
        } => {
            track::run(&config, &event_type, &params, &payload).await?;
        }
        Commands::Flush => {
            flush::run(config).await?;
        }
        Commands::Status => {
            status::run(&config).await?;
        }
    }

    Ok(())
}
