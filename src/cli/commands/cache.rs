//! Lookup cache maintenance commands.

use crate::config::Config;
use crate::enrichment::LookupStore;

use super::open_cache;

/// Show cache statistics
pub fn cmd_cache_stats(config: &Config) -> anyhow::Result<()> {
    let cache = open_cache(config);
    let expired = cache.purge_expired();
    let stats = cache.stats();

    println!("Lookup cache");
    println!("  Snapshot:  {:?}", config.cache.snapshot_path());
    println!("  Persisted: {}", if config.cache.persist { "yes" } else { "no" });
    println!("  Entries:   {}", stats.entries);
    println!("  TTL:       {}h", stats.ttl_secs / 3600);
    if expired > 0 {
        println!("  Expired:   {} (dropped)", expired);
    }
    Ok(())
}

/// Remove every cached resolution
pub fn cmd_cache_clear(config: &Config) -> anyhow::Result<()> {
    let cache = open_cache(config);
    let removed = cache.len();
    cache.clear();

    let path = config.cache.snapshot_path();
    if config.cache.persist {
        cache.save_snapshot(&path)?;
    } else if path.exists() {
        std::fs::remove_file(&path)?;
    }

    if removed == 0 {
        println!("Cache is already empty");
    } else {
        println!("✓ Removed {} cached lookups", removed);
    }
    Ok(())
}
