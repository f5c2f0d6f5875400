//! In-memory lookup cache with TTL expiry.
//!
//! Maps a [`QueryKey`] to the identity the provider returned for it. Entries
//! expire after a configurable TTL so upstream ticker changes are eventually
//! picked up. An expired entry is indistinguishable from one that was never
//! stored.
//!
//! The live entries can be written to a JSON snapshot and loaded back, so the
//! CLI reuses resolutions across runs.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::domain::{QueryKey, ResolvedIdentity};
use super::traits::LookupStore;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// One resolved lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: QueryKey,
    pub symbol: String,
    pub name: String,
    /// Wall-clock time of resolution
    pub resolved_at: DateTime<Utc>,
    pub ttl: Duration,
    /// `None` when the TTL runs past the clock's range
    expires_at: Option<Instant>,
}

impl CacheEntry {
    pub fn identity(&self) -> ResolvedIdentity {
        ResolvedIdentity::new(self.symbol.clone(), self.name.clone())
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| now < expires_at)
    }
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries stored, including any expired ones not yet purged
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub ttl_secs: u64,
}

/// Thread-safe in-memory cache.
pub struct MemoryCache {
    entries: RwLock<HashMap<QueryKey, CacheEntry>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Create an empty cache whose entries live for `default_ttl`.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Store a resolution with the cache's default TTL.
    pub fn insert(&self, key: QueryKey, symbol: impl Into<String>, name: impl Into<String>) {
        self.put(key, symbol.into(), name.into(), self.default_ttl);
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
        tracing::info!("Lookup cache cleared");
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Default snapshot location in the user cache directory.
    pub fn default_snapshot_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("portfolio-enricher")
            .join("lookups.json")
    }

    /// Write live entries to `path`.
    ///
    /// Writes to a temp file and renames it into place.
    pub fn save_snapshot(&self, path: &Path) -> Result<usize, std::io::Error> {
        let now = Instant::now();
        let records: Vec<SnapshotRecord> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.is_live(now))
            .map(SnapshotRecord::from)
            .collect();

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let contents = serde_json::to_vec_pretty(&records)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, contents)?;
        fs::rename(&temp_path, path)?;

        tracing::debug!("Saved {} cache entries to {:?}", records.len(), path);
        Ok(records.len())
    }

    /// Load entries from `path`, skipping ones whose TTL has run out.
    ///
    /// A missing file loads nothing.
    pub fn load_snapshot(&self, path: &Path) -> Result<usize, std::io::Error> {
        if !path.exists() {
            return Ok(0);
        }

        let contents = fs::read(path)?;
        let records: Vec<SnapshotRecord> = serde_json::from_slice(&contents)?;

        let now_utc = Utc::now();
        let now = Instant::now();
        let mut loaded = 0;
        let mut entries = self.entries.write();

        for record in records {
            let age = (now_utc - record.resolved_at).to_std().unwrap_or(Duration::ZERO);
            let ttl = Duration::from_secs(record.ttl_secs);
            let Some(remaining) = ttl.checked_sub(age).filter(|r| !r.is_zero()) else {
                continue;
            };

            entries.insert(
                record.key.clone(),
                CacheEntry {
                    key: record.key,
                    symbol: record.symbol,
                    name: record.name,
                    resolved_at: record.resolved_at,
                    ttl,
                    expires_at: now.checked_add(remaining),
                },
            );
            loaded += 1;
        }

        tracing::debug!("Loaded {} cache entries from {:?}", loaded, path);
        Ok(loaded)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl LookupStore for MemoryCache {
    fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
        let now = Instant::now();
        let found = self
            .entries
            .read()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .cloned();

        match found {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn put(&self, key: QueryKey, symbol: String, name: String, ttl: Duration) {
        let entry = CacheEntry {
            key: key.clone(),
            symbol,
            name,
            resolved_at: Utc::now(),
            ttl,
            expires_at: Instant::now().checked_add(ttl),
        };
        self.entries.write().insert(key, entry);
    }

    fn invalidate(&self, key: &QueryKey) {
        if self.entries.write().remove(key).is_some() {
            tracing::debug!("Invalidated cache entry {}", key);
        }
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ttl_secs: self.default_ttl.as_secs(),
        }
    }
}

/// On-disk form of a cache entry.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    key: QueryKey,
    symbol: String,
    name: String,
    resolved_at: DateTime<Utc>,
    ttl_secs: u64,
}

impl From<&CacheEntry> for SnapshotRecord {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            symbol: entry.symbol.clone(),
            name: entry.name.clone(),
            resolved_at: entry.resolved_at,
            ttl_secs: entry.ttl.as_secs(),
        }
    }
}
