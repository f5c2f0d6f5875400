//! Portfolio enrichment commands.

use std::path::PathBuf;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::enrichment::{BatchSummary, LookupEngine, LookupStatus, PortfolioRow};
use crate::portfolio;

use super::{open_cache, persist_cache, print_api_key_instructions};

/// Enrich every incomplete row of a portfolio CSV
pub fn cmd_lookup(
    rt: &Runtime,
    config: &Config,
    path: &PathBuf,
    output: Option<&PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let rows = portfolio::read_csv(path)?;
    if config.api_key().is_none() {
        print_api_key_instructions();
    }

    let cache = open_cache(config);
    let engine = LookupEngine::from_config(config, cache.clone())?;
    let cancel = CancellationToken::new();

    let outcome = rt.block_on(async {
        // Ctrl-C stops new lookups; admitted ones still land in the cache
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, cancelling remaining lookups");
                    cancel.cancel();
                }
            })
        };

        let outcome = engine.resolve_batch_cancellable(rows, &cancel).await;
        interrupt.abort();
        outcome
    });

    persist_cache(config, &cache);

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        for row in &outcome.rows {
            print_row(row);
        }
        println!();
        print_summary(&outcome.summary);
    }

    if let Some(output) = output {
        portfolio::write_csv(output, &outcome.rows)?;
        if !json {
            println!("Wrote {} rows to {:?}", outcome.rows.len(), output);
        }
    }

    Ok(())
}

/// Resolve a single name or symbol
pub fn cmd_resolve(
    rt: &Runtime,
    config: &Config,
    name: Option<&str>,
    symbol: Option<&str>,
) -> anyhow::Result<()> {
    if config.api_key().is_none() {
        print_api_key_instructions();
    }

    let cache = open_cache(config);
    let engine = LookupEngine::from_config(config, cache.clone())?;

    let row = rt.block_on(engine.resolve_single(PortfolioRow::new(1, name, symbol)));
    persist_cache(config, &cache);

    match row.lookup_status {
        LookupStatus::Success => {
            println!("✓ Match found!");
            println!();
            println!("  Name:   {}", row.name.as_deref().unwrap_or("-"));
            println!("  Symbol: {}", row.symbol.as_deref().unwrap_or("-"));
            Ok(())
        }
        _ => {
            let reason = row.failure_reason.unwrap_or_else(|| "unknown failure".to_string());
            println!("✗ {}", reason);
            anyhow::bail!("lookup failed")
        }
    }
}

fn print_row(row: &PortfolioRow) {
    let name = row.name.as_deref().unwrap_or("-");
    let symbol = row.symbol.as_deref().unwrap_or("-");
    match row.lookup_status {
        LookupStatus::Success => println!("✓ {:>4}  {:<8} {}", row.id, symbol, name),
        LookupStatus::Failed => println!(
            "✗ {:>4}  {:<8} {}  ({})",
            row.id,
            symbol,
            name,
            row.failure_reason.as_deref().unwrap_or("failed")
        ),
        LookupStatus::NotStarted | LookupStatus::Pending => {
            println!("  {:>4}  {:<8} {}", row.id, symbol, name)
        }
    }
}

fn print_summary(summary: &BatchSummary) {
    println!("=== Summary ===");
    println!("Rows:           {}", summary.total);
    println!("Needed lookup:  {}", summary.eligible);
    println!("Enriched:       {}", summary.succeeded);
    println!("Failed:         {}", summary.failed);
    println!("Cache hits:     {}", summary.cache_hits);
    println!("Provider calls: {}", summary.provider_calls);
    if summary.rate_limited > 0 {
        println!(
            "Rate limited:   {} (try again later)",
            summary.rate_limited
        );
    }
}
