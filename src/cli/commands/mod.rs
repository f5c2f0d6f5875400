//! CLI command definitions and dispatch.
//!
//! Each subcommand is implemented in its own submodule for maintainability:
//! - `lookup`: Batch enrichment of a portfolio CSV and single resolutions
//! - `cache`: Lookup cache statistics and clearing
//! - `settings`: Effective configuration display

mod cache;
mod lookup;
mod settings;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;

use crate::config::{self, Config};
use crate::enrichment::MemoryCache;

pub use cache::{cmd_cache_clear, cmd_cache_stats};
pub use lookup::{cmd_lookup, cmd_resolve};
pub use settings::cmd_config;

/// Portfolio Enricher CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Finnhub API key (or set FINNHUB_API_KEY env var)
    #[arg(long, global = true, env = "FINNHUB_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Fill missing names and symbols in a portfolio CSV
    Lookup {
        /// Path to the portfolio CSV
        path: PathBuf,
        /// Write the enriched portfolio to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print rows and summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a single company name or ticker symbol
    Resolve {
        /// Company name to find a symbol for
        #[arg(long, conflicts_with = "symbol", required_unless_present = "symbol")]
        name: Option<String>,
        /// Ticker symbol to find a company name for
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Inspect or clear the lookup cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Show the config file location and effective settings
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

/// Cache subcommands
#[derive(Subcommand, Clone, Copy)]
pub enum CacheAction {
    /// Show cache statistics
    Stats,
    /// Remove every cached resolution
    Clear,
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli);

    match &cli.command {
        Commands::Lookup { path, output, json } => {
            let rt = Runtime::new()?;
            cmd_lookup(&rt, &config, path, output.as_ref(), *json)
        }
        Commands::Resolve { name, symbol } => {
            let rt = Runtime::new()?;
            cmd_resolve(&rt, &config, name.as_deref(), symbol.as_deref())
        }
        Commands::Cache { action } => match action {
            CacheAction::Stats => cmd_cache_stats(&config),
            CacheAction::Clear => cmd_cache_clear(&config),
        },
        Commands::Config { init } => cmd_config(&config, cli.config.as_ref(), *init),
    }
}

// ============================================================================
// Shared helper functions
// ============================================================================

/// Load the config file, then apply command-line overrides.
fn load_config(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => config::load_from(path),
        None => config::load(),
    };
    if let Some(key) = cli.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        config.credentials.finnhub_api_key = Some(key.to_string());
    }
    config
}

/// Create the lookup cache, restoring the previous run's snapshot if enabled.
pub(crate) fn open_cache(config: &Config) -> Arc<MemoryCache> {
    let cache = Arc::new(MemoryCache::new(config.cache.ttl()));
    if config.cache.persist {
        let path = config.cache.snapshot_path();
        match cache.load_snapshot(&path) {
            Ok(count) => tracing::debug!("Restored {} cached lookups from {:?}", count, path),
            Err(e) => tracing::warn!("Ignoring unreadable cache snapshot {:?}: {}", path, e),
        }
    }
    cache
}

/// Save the cache snapshot if persistence is enabled.
pub(crate) fn persist_cache(config: &Config, cache: &MemoryCache) {
    if !config.cache.persist {
        return;
    }
    let path = config.cache.snapshot_path();
    match cache.save_snapshot(&path) {
        Ok(count) => tracing::debug!("Saved {} cached lookups to {:?}", count, path),
        Err(e) => tracing::warn!("Failed to save cache snapshot {:?}: {}", path, e),
    }
}

/// Print how to supply an API key
pub(crate) fn print_api_key_instructions() {
    eprintln!("Error: Finnhub API key required.");
    eprintln!("Get one at: https://finnhub.io/register");
    eprintln!("Then use: --api-key YOUR_KEY, set FINNHUB_API_KEY, or add it to the config file");
}
