//! Portfolio enrichment - fills missing company names and ticker symbols.
//!
//! # Architecture
//!
//! This module follows a clean separation between:
//! - **Domain models** (`domain.rs`) - Rows, query keys and failure taxonomy
//! - **Traits** (`traits.rs`) - The provider and cache seams
//! - **Cache** (`cache.rs`) - TTL lookup cache with JSON snapshots
//! - **Gate** (`gate/`) - Concurrency and rolling-window admission limits
//! - **Dedup** (`dedup.rs`) - One in-flight resolution per key
//! - **Finnhub** (`finnhub/`) - API DTOs, adapters and HTTP client
//! - **Engine** (`engine.rs`) - Batch orchestration over all of the above
//!
//! This decoupling means:
//! 1. API changes don't ripple through our codebase
//! 2. We can test the orchestration against mock providers
//! 3. We can swap the cache for an external store without touching the engine
//!
//! # Usage
//!
//! ```ignore
//! use portfolio_enricher::enrichment::{LookupEngine, MemoryCache};
//!
//! let cache = Arc::new(MemoryCache::default());
//! let engine = LookupEngine::from_config(&config, cache)?;
//!
//! let outcome = engine.resolve_batch(rows).await;
//! println!("{} rows enriched", outcome.summary.succeeded);
//! ```

pub mod cache;
pub mod dedup;
pub mod domain;
pub mod engine;
pub mod finnhub;
pub mod gate;
pub mod retry;
pub mod traits;

pub use cache::{CacheEntry, CacheStats, DEFAULT_TTL, MemoryCache};
pub use dedup::Deduplicator;
pub use domain::{
    Eligibility, FailureKind, LookupError, LookupResult, LookupStatus, PortfolioRow,
    ProviderError, QueryKey, RateLimitSource, ResolvedIdentity,
};
pub use engine::{BatchOutcome, BatchSummary, EngineSettings, LookupEngine};
pub use gate::{AdmissionGate, AdmissionTimeout, GateLimits};
pub use retry::{RetryPolicy, RetryingProvider};
pub use traits::{LookupStore, SymbolProvider};
