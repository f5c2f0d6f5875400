//! Trait definitions for the engine's external collaborators.
//!
//! These traits enable dependency injection and mocking for tests.
//! Production code uses the Finnhub client and the in-memory cache, while
//! tests can substitute mock implementations.
//!
//! # Example
//!
//! ```ignore
//! use portfolio_enricher::enrichment::traits::SymbolProvider;
//!
//! // In production code:
//! async fn resolve<P: SymbolProvider>(client: &P, key: &QueryKey) {
//!     let identity = client.lookup(key).await?;
//! }
//!
//! // In tests:
//! struct MockProvider { ... }
//! impl SymbolProvider for MockProvider { ... }
//! ```

use std::time::Duration;

use async_trait::async_trait;

use super::cache::{CacheEntry, CacheStats};
use super::domain::{ProviderError, QueryKey, ResolvedIdentity};

/// Trait for the external symbol/name lookup service.
///
/// One call to `lookup` is one billable provider request from the engine's
/// point of view, however the implementation reaches the service.
#[async_trait]
pub trait SymbolProvider: Send + Sync {
    /// Resolve a normalized name or symbol to the provider's best match.
    async fn lookup(&self, key: &QueryKey) -> Result<ResolvedIdentity, ProviderError>;

    /// Whether the provider can be called at all.
    ///
    /// Checked once per batch before any row is dispatched.
    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Key-value store for resolved lookups with TTL expiry.
///
/// Access is synchronous and must never block on network I/O.
pub trait LookupStore: Send + Sync {
    /// Live entry for the key. Expired entries are reported as a miss.
    fn get(&self, key: &QueryKey) -> Option<CacheEntry>;

    /// Store a resolution. Last write wins.
    fn put(&self, key: QueryKey, symbol: String, name: String, ttl: Duration);

    /// Drop the entry for a key, if any.
    fn invalidate(&self, key: &QueryKey);

    /// Whether the store can serve requests.
    fn is_reachable(&self) -> bool {
        true
    }

    fn stats(&self) -> CacheStats;
}
