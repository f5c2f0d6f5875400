//! Portfolio Enricher - command-line entry point.

use clap::Parser;
use portfolio_enricher::cli;
use tracing_subscriber::{EnvFilter, filter::Directive, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    let default_directive: Directive = "portfolio_enricher=info".parse()?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(default_directive))
        .init();

    cli::run_command(&args)
}
