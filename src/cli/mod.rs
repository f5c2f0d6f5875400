//! Command-line interface for portfolio-enricher.
//!
//! This module provides CLI commands for enriching portfolio CSV files,
//! resolving single names or symbols, and managing the lookup cache.

mod commands;

pub use commands::{CacheAction, Cli, Commands, run_command};
