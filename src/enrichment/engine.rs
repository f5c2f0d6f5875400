//! Lookup engine - fills missing names and symbols for a batch of rows.
//!
//! For every incomplete row:
//! 1. Derive the row's [`QueryKey`]
//! 2. Serve it from the cache if a live entry exists
//! 3. Otherwise join or start a deduplicated resolution
//! 4. Wait for admission through the gate, then call the provider
//! 5. Write successes back to the cache and update every row that asked
//!
//! Rows sharing a key share one resolution. Output order always matches input
//! order, and every row ends the call in a terminal state (or untouched, if it
//! was already complete).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::cache::DEFAULT_TTL;
use super::dedup::Deduplicator;
use super::domain::{
    Eligibility, FailureKind, LookupError, LookupResult, LookupStatus, PortfolioRow, QueryKey,
    RateLimitSource, ResolvedIdentity,
};
use super::finnhub::FinnhubClient;
use super::gate::{AdmissionGate, GateLimits};
use super::retry::RetryingProvider;
use super::traits::{LookupStore, SymbolProvider};
use crate::config::Config;

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub limits: GateLimits,
    /// Longest a single resolution may wait for admission
    pub admission_timeout: Duration,
    /// Lifetime of cache entries written by the engine
    pub cache_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            limits: GateLimits::default(),
            admission_timeout: Duration::from_secs(30),
            cache_ttl: DEFAULT_TTL,
        }
    }
}

/// Counts describing one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Rows in the batch
    pub total: usize,
    /// Rows that needed a lookup (incomplete rows)
    pub eligible: usize,
    /// Eligible rows answered from the cache
    pub cache_hits: usize,
    /// Provider calls issued on behalf of this batch
    pub provider_calls: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failed rows whose cause was rate-limit exhaustion
    pub rate_limited: usize,
}

impl BatchSummary {
    /// HTTP status the surrounding service reports for the batch.
    ///
    /// 429 when any row hit a rate limit, 201 when the cache answered any
    /// row, 200 otherwise.
    pub fn http_status(&self) -> u16 {
        if self.rate_limited > 0 {
            429
        } else if self.cache_hits > 0 {
            201
        } else {
            200
        }
    }

    fn tally(rows: &[PortfolioRow], eligible: usize, cache_hits: usize, provider_calls: usize) -> Self {
        let mut summary = Self {
            total: rows.len(),
            eligible,
            cache_hits,
            provider_calls,
            ..Default::default()
        };
        for row in rows {
            match row.lookup_status {
                LookupStatus::Success => summary.succeeded += 1,
                LookupStatus::Failed => {
                    summary.failed += 1;
                    if row.failure_kind == Some(FailureKind::RateLimited) {
                        summary.rate_limited += 1;
                    }
                }
                LookupStatus::NotStarted | LookupStatus::Pending => {}
            }
        }
        summary
    }
}

/// Rows plus the summary for one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub rows: Vec<PortfolioRow>,
    pub summary: BatchSummary,
}

/// How one key was answered.
struct KeyOutcome {
    outcome: Result<ResolvedIdentity, LookupError>,
    cached: bool,
}

/// Per-call resolution of a set of keys.
#[derive(Default)]
struct Resolutions {
    by_key: HashMap<QueryKey, KeyOutcome>,
    provider_calls: usize,
}

/// Batch orchestrator over a provider and a cache.
pub struct LookupEngine {
    provider: Arc<dyn SymbolProvider>,
    store: Arc<dyn LookupStore>,
    gate: AdmissionGate,
    dedup: Deduplicator,
    settings: EngineSettings,
}

impl LookupEngine {
    pub fn new(
        provider: Arc<dyn SymbolProvider>,
        store: Arc<dyn LookupStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            provider,
            store,
            gate: AdmissionGate::new(settings.limits),
            dedup: Deduplicator::new(),
            settings,
        }
    }

    /// Build an engine backed by Finnhub, with retries, from application config.
    pub fn from_config(config: &Config, store: Arc<dyn LookupStore>) -> crate::error::Result<Self> {
        let client = FinnhubClient::with_options(
            config.api_key().unwrap_or_default(),
            config.provider.base_url.clone(),
            config.provider.request_timeout(),
        )?;
        let provider = RetryingProvider::new(client, config.lookup.retry_policy());
        Ok(Self::new(Arc::new(provider), store, config.engine_settings()))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Keys currently being resolved by any caller.
    pub fn in_flight(&self) -> usize {
        self.dedup.in_flight()
    }

    /// Resolve every incomplete row in the batch.
    pub async fn resolve_batch(&self, rows: Vec<PortfolioRow>) -> BatchOutcome {
        self.resolve_batch_cancellable(rows, &CancellationToken::new())
            .await
    }

    /// Resolve every incomplete row, stopping early if `cancel` fires.
    ///
    /// Once cancelled, no further provider calls are admitted. Calls already
    /// admitted still finish and populate the cache, but their rows are
    /// reported as cancelled.
    pub async fn resolve_batch_cancellable(
        &self,
        mut rows: Vec<PortfolioRow>,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let mut pending: HashMap<QueryKey, Vec<usize>> = HashMap::new();
        let mut eligible = 0;

        for (index, row) in rows.iter_mut().enumerate() {
            match row.eligibility() {
                Eligibility::Complete => {}
                Eligibility::Insufficient => {
                    eligible += 1;
                    row.mark_failed(&LookupError::InsufficientData);
                }
                Eligibility::Resolve(key) => {
                    eligible += 1;
                    row.mark_pending();
                    pending.entry(key).or_default().push(index);
                }
            }
        }

        if pending.is_empty() {
            let summary = BatchSummary::tally(&rows, eligible, 0, 0);
            return BatchOutcome { rows, summary };
        }

        tracing::info!(
            "Resolving batch: {} rows, {} eligible, {} distinct keys",
            rows.len(),
            eligible,
            pending.len()
        );

        let resolutions = self
            .resolve_keys(pending.keys().cloned().collect(), cancel)
            .await;

        let mut cache_hits = 0;
        for (key, indices) in &pending {
            let Some(resolved) = resolutions.by_key.get(key) else {
                for &index in indices {
                    rows[index].mark_failed(&LookupError::Cancelled);
                }
                continue;
            };
            if resolved.cached {
                cache_hits += indices.len();
            }
            for &index in indices {
                let row = &mut rows[index];
                row.apply_outcome(&resolved.outcome);
                if let Some(reason) = &row.failure_reason {
                    tracing::warn!("Row {} ({}) failed: {}", row.id, key, reason);
                }
            }
        }

        let summary =
            BatchSummary::tally(&rows, eligible, cache_hits, resolutions.provider_calls);
        tracing::info!(
            "Batch complete: {} succeeded, {} failed ({} rate limited), {} cache hits, {} provider calls",
            summary.succeeded,
            summary.failed,
            summary.rate_limited,
            summary.cache_hits,
            summary.provider_calls
        );

        BatchOutcome { rows, summary }
    }

    /// Resolve one row through the same path as a batch.
    ///
    /// A row whose key is already being resolved joins that resolution.
    pub async fn resolve_single(&self, row: PortfolioRow) -> PortfolioRow {
        self.resolve_single_cancellable(row, &CancellationToken::new())
            .await
    }

    pub async fn resolve_single_cancellable(
        &self,
        mut row: PortfolioRow,
        cancel: &CancellationToken,
    ) -> PortfolioRow {
        match row.eligibility() {
            Eligibility::Complete => {}
            Eligibility::Insufficient => row.mark_failed(&LookupError::InsufficientData),
            Eligibility::Resolve(key) => {
                row.mark_pending();
                let mut resolutions = self.resolve_keys(vec![key.clone()], cancel).await;
                match resolutions.by_key.remove(&key) {
                    Some(resolved) => row.apply_outcome(&resolved.outcome),
                    None => row.mark_failed(&LookupError::Cancelled),
                }
            }
        }
        row
    }

    /// Drop the cached resolution for a key.
    pub fn invalidate(&self, key: &QueryKey) {
        self.store.invalidate(key);
    }

    /// Drop the cached resolution a row would use, returning its key.
    ///
    /// Complete rows and rows with no identifying data have no key.
    pub fn invalidate_row(&self, row: &PortfolioRow) -> Option<QueryKey> {
        match row.eligibility() {
            Eligibility::Resolve(key) => {
                self.invalidate(&key);
                Some(key)
            }
            Eligibility::Complete | Eligibility::Insufficient => None,
        }
    }

    /// Answer each key from the cache or the provider.
    async fn resolve_keys(&self, keys: Vec<QueryKey>, cancel: &CancellationToken) -> Resolutions {
        let mut resolutions = Resolutions::default();

        if !self.store.is_reachable() {
            let error = LookupError::Unavailable("lookup cache is unreachable".to_string());
            tracing::warn!("{}", error);
            resolutions.fail_all(keys, &error);
            return resolutions;
        }

        let mut misses = Vec::new();
        for key in keys {
            match self.store.get(&key) {
                Some(entry) => {
                    tracing::debug!("Cache hit for {}", key);
                    resolutions.by_key.insert(
                        key,
                        KeyOutcome {
                            outcome: Ok(entry.identity()),
                            cached: true,
                        },
                    );
                }
                None => misses.push(key),
            }
        }

        if misses.is_empty() {
            return resolutions;
        }

        if let Err(e) = self.provider.health_check().await {
            let error = LookupError::Unavailable(e.to_string());
            tracing::warn!("{}", error);
            resolutions.fail_all(misses, &error);
            return resolutions;
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let results = join_all(
            misses
                .into_iter()
                .map(|key| self.resolve_key(key, cancel, Arc::clone(&calls))),
        )
        .await;

        for result in results {
            resolutions.by_key.insert(
                result.key,
                KeyOutcome {
                    outcome: result.outcome,
                    cached: false,
                },
            );
        }
        resolutions.provider_calls = calls.load(Ordering::Acquire);
        resolutions
    }

    /// Resolve one cache miss through the deduplicator.
    async fn resolve_key(
        &self,
        key: QueryKey,
        cancel: &CancellationToken,
        calls: Arc<AtomicUsize>,
    ) -> LookupResult {
        let mut reissued = false;

        loop {
            let fetch = Fetch {
                key: key.clone(),
                provider: Arc::clone(&self.provider),
                store: Arc::clone(&self.store),
                gate: self.gate.clone(),
                cancel: cancel.clone(),
                calls: Arc::clone(&calls),
                admission_timeout: self.settings.admission_timeout,
                cache_ttl: self.settings.cache_ttl,
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => LookupResult {
                    key: key.clone(),
                    outcome: Err(LookupError::Cancelled),
                },
                result = self.dedup.resolve(key.clone(), move || fetch.run()) => result,
            };

            // Joined a resolution whose own batch was cancelled before admission
            let inherited =
                matches!(result.outcome, Err(LookupError::Cancelled)) && !cancel.is_cancelled();
            if inherited && !reissued {
                tracing::debug!("Re-issuing {} after a cancelled shared resolution", key);
                reissued = true;
                continue;
            }
            return result;
        }
    }
}

impl Resolutions {
    fn fail_all(&mut self, keys: Vec<QueryKey>, error: &LookupError) {
        for key in keys {
            self.by_key.insert(
                key,
                KeyOutcome {
                    outcome: Err(error.clone()),
                    cached: false,
                },
            );
        }
    }
}

/// Everything a spawned resolution needs, owned.
struct Fetch {
    key: QueryKey,
    provider: Arc<dyn SymbolProvider>,
    store: Arc<dyn LookupStore>,
    gate: AdmissionGate,
    cancel: CancellationToken,
    calls: Arc<AtomicUsize>,
    admission_timeout: Duration,
    cache_ttl: Duration,
}

impl Fetch {
    async fn run(self) -> LookupResult {
        let outcome = self.call_provider().await;
        LookupResult {
            key: self.key,
            outcome,
        }
    }

    async fn call_provider(&self) -> Result<ResolvedIdentity, LookupError> {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(LookupError::Cancelled),
            admitted = self.gate.acquire_within(self.admission_timeout) => admitted,
        };
        let permit = permit.map_err(|e| {
            tracing::warn!("{} for {}", e, self.key);
            LookupError::RateLimited(RateLimitSource::Admission)
        })?;

        self.calls.fetch_add(1, Ordering::AcqRel);
        let result = self.provider.lookup(&self.key).await;
        self.gate.release(permit);

        match result {
            Ok(identity) => {
                tracing::info!("Resolved {} -> {} ({})", self.key, identity.symbol, identity.name);
                self.store.put(
                    self.key.clone(),
                    identity.symbol.clone(),
                    identity.name.clone(),
                    self.cache_ttl,
                );
                Ok(identity)
            }
            Err(e) => Err(LookupError::from_provider(e, &self.key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::cache::{CacheEntry, CacheStats, MemoryCache};
    use crate::enrichment::domain::ProviderError;
    use crate::enrichment::traits::mocks::MockProvider;

    fn engine_with(provider: &Arc<MockProvider>, settings: EngineSettings) -> (LookupEngine, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::new(settings.cache_ttl));
        let engine = LookupEngine::new(provider.clone(), cache.clone(), settings);
        (engine, cache)
    }

    fn engine(provider: &Arc<MockProvider>) -> (LookupEngine, Arc<MemoryCache>) {
        engine_with(provider, EngineSettings::default())
    }

    fn by_name(id: u64, name: &str) -> PortfolioRow {
        PortfolioRow::new(id, Some(name), None)
    }

    #[tokio::test]
    async fn test_complete_rows_pass_through() {
        let provider = Arc::new(MockProvider::empty());
        let (engine, _) = engine(&provider);

        let mut row = PortfolioRow::new(1, Some("Apple Inc."), Some("AAPL"));
        row.price = Some(189.5);
        row.shares = Some(10.0);

        let outcome = engine.resolve_batch(vec![row.clone()]).await;
        assert_eq!(outcome.rows, vec![row]);
        assert_eq!(outcome.rows[0].lookup_status, LookupStatus::NotStarted);
        assert_eq!(outcome.summary.eligible, 0);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let provider = Arc::new(MockProvider::empty());
        let (engine, _) = engine(&provider);

        let outcome = engine.resolve_batch(Vec::new()).await;
        assert!(outcome.rows.is_empty());
        assert_eq!(outcome.summary, BatchSummary::default());
    }

    #[tokio::test]
    async fn test_insufficient_data_fails_without_calls() {
        let provider = Arc::new(MockProvider::empty());
        let (engine, cache) = engine(&provider);

        let outcome = engine
            .resolve_batch(vec![PortfolioRow::new(1, Some("  "), None)])
            .await;

        let row = &outcome.rows[0];
        assert_eq!(row.lookup_status, LookupStatus::Failed);
        assert_eq!(row.failure_reason.as_deref(), Some("insufficient data"));
        assert_eq!(row.failure_kind, Some(FailureKind::InsufficientData));
        assert_eq!(provider.calls(), 0);
        assert!(cache.is_empty());
        assert_eq!(outcome.summary.failed, 1);
    }

    #[tokio::test]
    async fn test_microsoft_and_apple_scenario() {
        let provider = Arc::new(MockProvider::empty().with_name("Microsoft Corporation", "MSFT"));
        let (engine, _) = engine(&provider);

        let apple = PortfolioRow::new(3, Some("Apple Inc."), Some("AAPL"));
        let rows = vec![
            by_name(1, "Microsoft Corporation"),
            by_name(2, "microsoft   corporation "),
            apple.clone(),
        ];

        let outcome = engine.resolve_batch(rows).await;
        assert_eq!(provider.calls(), 1);

        for row in &outcome.rows[..2] {
            assert_eq!(row.symbol.as_deref(), Some("MSFT"));
            assert!(row.is_enriched);
            assert_eq!(row.lookup_status, LookupStatus::Success);
        }
        // Existing names are kept as written
        assert_eq!(outcome.rows[1].name.as_deref(), Some("microsoft   corporation "));
        assert_eq!(outcome.rows[2], apple);

        assert_eq!(outcome.summary.eligible, 2);
        assert_eq!(outcome.summary.succeeded, 2);
        assert_eq!(outcome.summary.provider_calls, 1);
        assert_eq!(outcome.summary.http_status(), 200);
    }

    #[tokio::test]
    async fn test_many_rows_one_key_one_call() {
        let provider = Arc::new(
            MockProvider::empty()
                .with_name("Tesla Inc", "TSLA")
                .with_latency(Duration::from_millis(5)),
        );
        let (engine, _) = engine(&provider);

        let rows: Vec<_> = (1..=20).map(|id| by_name(id, "Tesla Inc")).collect();
        let outcome = engine.resolve_batch(rows).await;

        assert_eq!(provider.calls(), 1);
        assert!(outcome.rows.iter().all(|r| r.symbol.as_deref() == Some("TSLA")));
        // Output order matches input order
        let ids: Vec<u64> = outcome.rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_symbol_key_fills_name() {
        let provider = Arc::new(MockProvider::empty().with_symbol("AAPL", "Apple Inc"));
        let (engine, _) = engine(&provider);

        let outcome = engine
            .resolve_batch(vec![PortfolioRow::new(1, None, Some(" aapl "))])
            .await;

        let row = &outcome.rows[0];
        assert_eq!(row.name.as_deref(), Some("Apple Inc"));
        assert_eq!(row.symbol.as_deref(), Some(" aapl "));
        assert!(row.is_enriched);
    }

    #[tokio::test]
    async fn test_not_found_scenario() {
        let provider = Arc::new(MockProvider::empty());
        let (engine, cache) = engine(&provider);

        let outcome = engine
            .resolve_batch(vec![by_name(1, "Unknown Tech Co")])
            .await;

        let row = &outcome.rows[0];
        assert_eq!(row.lookup_status, LookupStatus::Failed);
        assert!(!row.failure_reason.as_deref().unwrap_or_default().is_empty());
        assert_eq!(row.failure_kind, Some(FailureKind::NotFound));
        assert_eq!(row.symbol, None);
        assert!(!row.is_enriched);
        // Failures are not cached
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_second_batch_served_from_cache() {
        let provider = Arc::new(MockProvider::empty().with_name("Microsoft Corporation", "MSFT"));
        let (engine, _) = engine(&provider);
        let rows = vec![by_name(1, "Microsoft Corporation")];

        let first = engine.resolve_batch(rows.clone()).await;
        let second = engine.resolve_batch(rows).await;

        assert_eq!(provider.calls(), 1);
        assert_eq!(first.rows, second.rows);
        assert_eq!(second.summary.cache_hits, 1);
        assert_eq!(second.summary.provider_calls, 0);
        assert_eq!(second.summary.http_status(), 201);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_triggers_fresh_call() {
        let provider = Arc::new(MockProvider::empty().with_name("Microsoft Corporation", "MSFT"));
        let settings = EngineSettings {
            cache_ttl: Duration::from_secs(60),
            ..Default::default()
        };
        let (engine, _) = engine_with(&provider, settings);
        let rows = vec![by_name(1, "Microsoft Corporation")];

        engine.resolve_batch(rows.clone()).await;
        tokio::time::advance(Duration::from_secs(59)).await;
        engine.resolve_batch(rows.clone()).await;
        assert_eq!(provider.calls(), 1);

        tokio::time::advance(Duration::from_secs(1) + Duration::from_millis(1)).await;
        let outcome = engine.resolve_batch(rows).await;
        assert_eq!(provider.calls(), 2);
        assert_eq!(outcome.summary.cache_hits, 0);
    }

    #[tokio::test]
    async fn test_huge_cache_ttl_keeps_result() {
        let provider = Arc::new(MockProvider::empty().with_name("Alpha", "ALPH"));
        let settings = EngineSettings {
            cache_ttl: Duration::from_secs(u64::MAX),
            ..Default::default()
        };
        let (engine, cache) = engine_with(&provider, settings);

        let outcome = engine.resolve_batch(vec![by_name(1, "Alpha")]).await;
        let row = &outcome.rows[0];
        assert_eq!(row.lookup_status, LookupStatus::Success);
        assert_eq!(row.symbol.as_deref(), Some("ALPH"));
        assert_eq!(cache.len(), 1);

        engine.resolve_batch(vec![by_name(2, "Alpha")]).await;
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_bounds_concurrent_calls() {
        let mut mock = MockProvider::empty().with_latency(Duration::from_millis(100));
        let names = ["Alpha", "Bravo", "Charlie", "Delta", "Echo"];
        for (i, name) in names.iter().enumerate() {
            mock = mock.with_name(name, &format!("SYM{}", i));
        }
        let provider = Arc::new(mock);
        let settings = EngineSettings {
            limits: GateLimits {
                max_concurrent: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let (engine, _) = engine_with(&provider, settings);

        let rows = names
            .iter()
            .enumerate()
            .map(|(i, name)| by_name(i as u64 + 1, name))
            .collect();
        let outcome = engine.resolve_batch(rows).await;

        assert_eq!(provider.calls(), 5);
        assert!(provider.peak_in_flight() <= 2);
        assert_eq!(engine.gate().concurrency().peak(), 2);
        assert_eq!(outcome.summary.succeeded, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_timeout_is_rate_limited() {
        let provider = Arc::new(
            MockProvider::empty()
                .with_name("Alpha", "AAA")
                .with_name("Bravo", "BBB"),
        );
        let settings = EngineSettings {
            limits: GateLimits {
                max_concurrent: 5,
                calls_per_window: 1,
                window: Duration::from_secs(60),
            },
            admission_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let (engine, _) = engine_with(&provider, settings);

        let outcome = engine
            .resolve_batch(vec![by_name(1, "Alpha"), by_name(2, "Bravo")])
            .await;

        assert_eq!(provider.calls(), 1);
        assert_eq!(outcome.summary.succeeded, 1);
        assert_eq!(outcome.summary.rate_limited, 1);
        assert_eq!(outcome.summary.http_status(), 429);

        let limited = outcome
            .rows
            .iter()
            .find(|r| r.failure_kind == Some(FailureKind::RateLimited));
        assert!(limited.is_some());
    }

    #[tokio::test]
    async fn test_provider_rate_limit_is_distinct() {
        let provider = Arc::new(
            MockProvider::empty()
                .with_error(QueryKey::from_name("Alpha"), ProviderError::RateLimited),
        );
        let (engine, _) = engine(&provider);

        let outcome = engine.resolve_batch(vec![by_name(1, "Alpha")]).await;
        let row = &outcome.rows[0];
        assert_eq!(row.failure_kind, Some(FailureKind::RateLimited));
        assert_eq!(
            row.failure_reason.as_deref(),
            Some("API rate limit exceeded. Please try again later.")
        );
        assert_eq!(outcome.summary.rate_limited, 1);
    }

    #[tokio::test]
    async fn test_unhealthy_provider_fails_uniformly() {
        let provider = Arc::new(
            MockProvider::empty()
                .with_name("Alpha", "AAA")
                .unhealthy(ProviderError::Invalid("no API key".into())),
        );
        let (engine, cache) = engine(&provider);
        cache.insert(QueryKey::from_name("Cached Co"), "CCO", "Cached Co");

        let complete = PortfolioRow::new(4, Some("Apple Inc."), Some("AAPL"));
        let outcome = engine
            .resolve_batch(vec![
                by_name(1, "Alpha"),
                PortfolioRow::new(2, None, Some("MSFT")),
                by_name(3, "Cached Co"),
                complete.clone(),
            ])
            .await;

        assert_eq!(provider.calls(), 0);
        for row in &outcome.rows[..2] {
            assert_eq!(row.failure_kind, Some(FailureKind::Unavailable));
        }
        assert_eq!(outcome.rows[0].failure_reason, outcome.rows[1].failure_reason);
        // Cache hits do not need the provider
        assert_eq!(outcome.rows[2].symbol.as_deref(), Some("CCO"));
        assert_eq!(outcome.rows[3], complete);
    }

    /// Store that reports itself unreachable.
    struct OfflineStore;

    impl LookupStore for OfflineStore {
        fn get(&self, _key: &QueryKey) -> Option<CacheEntry> {
            None
        }

        fn put(&self, _key: QueryKey, _symbol: String, _name: String, _ttl: Duration) {}

        fn invalidate(&self, _key: &QueryKey) {}

        fn is_reachable(&self) -> bool {
            false
        }

        fn stats(&self) -> CacheStats {
            CacheStats {
                entries: 0,
                hits: 0,
                misses: 0,
                ttl_secs: 0,
            }
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_uniformly() {
        let provider = Arc::new(MockProvider::empty().with_name("Alpha", "AAA"));
        let engine = LookupEngine::new(provider.clone(), Arc::new(OfflineStore), EngineSettings::default());

        let outcome = engine
            .resolve_batch(vec![by_name(1, "Alpha"), by_name(2, "Bravo")])
            .await;

        assert_eq!(provider.calls(), 0);
        assert!(
            outcome
                .rows
                .iter()
                .all(|r| r.failure_kind == Some(FailureKind::Unavailable))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_single_joins_in_flight_batch() {
        let provider = Arc::new(
            MockProvider::empty()
                .with_name("Microsoft Corporation", "MSFT")
                .with_latency(Duration::from_millis(100)),
        );
        let (engine, _) = engine(&provider);
        let engine = Arc::new(engine);

        let batch = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .resolve_batch(vec![by_name(1, "Microsoft Corporation")])
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.in_flight(), 1);

        let single = engine
            .resolve_single(by_name(7, "MICROSOFT CORPORATION"))
            .await;
        let batch = batch.await.unwrap();

        assert_eq!(provider.calls(), 1);
        assert_eq!(single.symbol.as_deref(), Some("MSFT"));
        assert_eq!(single.id, 7);
        assert_eq!(batch.rows[0].symbol.as_deref(), Some("MSFT"));
    }

    #[tokio::test]
    async fn test_retry_after_invalidate() {
        let provider = Arc::new(MockProvider::empty().with_name("Alpha", "AAA"));
        let (engine, cache) = engine(&provider);
        let row = by_name(1, "Alpha");

        engine.resolve_single(row.clone()).await;
        assert_eq!(engine.invalidate_row(&row), Some(QueryKey::from_name("alpha")));
        assert!(cache.is_empty());

        let retried = engine.resolve_single(row).await;
        assert_eq!(retried.lookup_status, LookupStatus::Success);
        assert_eq!(provider.calls(), 2);

        let complete = PortfolioRow::new(2, Some("Alpha"), Some("AAA"));
        assert_eq!(engine.invalidate_row(&complete), None);
    }

    #[tokio::test]
    async fn test_failed_row_can_be_retried() {
        let provider = Arc::new(
            MockProvider::empty()
                .with_error(QueryKey::from_name("Alpha"), ProviderError::Transient("503".into())),
        );
        let (engine, _) = engine(&provider);

        let failed = engine.resolve_single(by_name(1, "Alpha")).await;
        assert_eq!(failed.failure_kind, Some(FailureKind::Transient));

        let retried = engine.resolve_single(failed).await;
        assert_eq!(retried.lookup_status, LookupStatus::Failed);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_new_calls() {
        let provider = Arc::new(
            MockProvider::empty()
                .with_name("Alpha", "AAA")
                .with_name("Bravo", "BBB")
                .with_name("Charlie", "CCC")
                .with_latency(Duration::from_millis(100)),
        );
        let settings = EngineSettings {
            limits: GateLimits {
                max_concurrent: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let (engine, cache) = engine_with(&provider, settings);
        let engine = Arc::new(engine);
        let cancel = CancellationToken::new();

        let batch = {
            let engine = Arc::clone(&engine);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let rows = vec![by_name(1, "Alpha"), by_name(2, "Bravo"), by_name(3, "Charlie")];
                engine.resolve_batch_cancellable(rows, &cancel).await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let outcome = batch.await.unwrap();

        assert!(outcome.rows.iter().all(|r| {
            r.failure_kind == Some(FailureKind::Cancelled)
                && r.failure_reason.as_deref() == Some("cancelled")
        }));

        // The admitted call finishes in the background and is cached
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(provider.calls(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_joiner_reissues_after_foreign_cancellation() {
        let provider = Arc::new(MockProvider::empty().with_name("Alpha", "AAA"));
        let settings = EngineSettings {
            limits: GateLimits {
                max_concurrent: 1,
                ..Default::default()
            },
            admission_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        let (engine, _) = engine_with(&provider, settings);
        let engine = Arc::new(engine);

        // Occupy the only slot so resolutions queue at admission
        let held = engine.gate().acquire().await;

        let cancel_a = CancellationToken::new();
        let batch_a = {
            let engine = Arc::clone(&engine);
            let cancel = cancel_a.clone();
            tokio::spawn(async move {
                engine
                    .resolve_batch_cancellable(vec![by_name(1, "Alpha")], &cancel)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let batch_b = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.resolve_batch(vec![by_name(2, "Alpha")]).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        cancel_a.cancel();
        let a = batch_a.await.unwrap();
        assert_eq!(a.rows[0].failure_kind, Some(FailureKind::Cancelled));

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);

        let b = batch_b.await.unwrap();
        assert_eq!(b.rows[0].symbol.as_deref(), Some("AAA"));
        assert_eq!(provider.calls(), 1);
    }
}
