//! Internal domain models for portfolio rows and symbol resolution.
//!
//! These types are OUR types - they don't change when the provider API changes.
//! Provider responses get converted into these types via adapters.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One line of an uploaded portfolio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioRow {
    /// Stable id assigned at ingestion, unique within a batch
    pub id: u64,
    /// Company name
    #[serde(default)]
    pub name: Option<String>,
    /// Ticker symbol
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub shares: Option<f64>,
    #[serde(default)]
    pub market_value: Option<f64>,
    #[serde(default)]
    pub lookup_status: LookupStatus,
    /// Human-readable cause, only set when `lookup_status` is `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Machine-readable cause, only set when `lookup_status` is `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    /// At least one field was filled by the engine. Never reset once set.
    #[serde(default)]
    pub is_enriched: bool,
}

/// Per-row lookup state.
///
/// `NotStarted -> Pending -> {Success, Failed}`. A failed row may be retried,
/// which moves it back to `Pending`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    #[default]
    NotStarted,
    Pending,
    Success,
    Failed,
}

impl LookupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LookupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the engine can do with a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// Both name and symbol present - passes through untouched
    Complete,
    /// Neither name nor symbol present - cannot be looked up
    Insufficient,
    /// One field missing - resolve it with this key
    Resolve(QueryKey),
}

impl PortfolioRow {
    /// Create a row with just the identifying fields set.
    pub fn new(id: u64, name: Option<&str>, symbol: Option<&str>) -> Self {
        Self {
            id,
            name: name.map(str::to_string),
            symbol: symbol.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn has_name(&self) -> bool {
        non_empty(self.name.as_deref()).is_some()
    }

    pub fn has_symbol(&self) -> bool {
        non_empty(self.symbol.as_deref()).is_some()
    }

    /// A row is complete iff both name and symbol are non-empty.
    pub fn is_complete(&self) -> bool {
        self.has_name() && self.has_symbol()
    }

    /// Decide how this row should be handled.
    ///
    /// Missing symbol is looked up by name, missing name by symbol.
    pub fn eligibility(&self) -> Eligibility {
        match (
            non_empty(self.name.as_deref()),
            non_empty(self.symbol.as_deref()),
        ) {
            (Some(_), Some(_)) => Eligibility::Complete,
            (None, None) => Eligibility::Insufficient,
            (Some(name), None) => Eligibility::Resolve(QueryKey::from_name(name)),
            (None, Some(symbol)) => Eligibility::Resolve(QueryKey::from_symbol(symbol)),
        }
    }

    pub(crate) fn mark_pending(&mut self) {
        self.lookup_status = LookupStatus::Pending;
        self.failure_reason = None;
        self.failure_kind = None;
    }

    pub(crate) fn mark_failed(&mut self, error: &LookupError) {
        self.lookup_status = LookupStatus::Failed;
        self.failure_reason = Some(error.to_string());
        self.failure_kind = Some(error.kind());
    }

    /// Fill missing fields from a resolution. Existing values are never overwritten.
    pub(crate) fn apply_identity(&mut self, identity: &ResolvedIdentity) {
        let mut filled = false;
        if !self.has_symbol() && !identity.symbol.is_empty() {
            self.symbol = Some(identity.symbol.clone());
            filled = true;
        }
        if !self.has_name() && !identity.name.is_empty() {
            self.name = Some(identity.name.clone());
            filled = true;
        }

        if filled {
            self.is_enriched = true;
            self.lookup_status = LookupStatus::Success;
            self.failure_reason = None;
            self.failure_kind = None;
        } else {
            self.mark_failed(&LookupError::Invalid(
                "provider returned an empty match".to_string(),
            ));
        }
    }

    pub(crate) fn apply_outcome(&mut self, outcome: &Result<ResolvedIdentity, LookupError>) {
        match outcome {
            Ok(identity) => self.apply_identity(identity),
            Err(error) => self.mark_failed(error),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Canonical identifier for what is known about a row.
///
/// Used as both the cache key and the deduplication key. Names and symbols
/// live in separate namespaces so they never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum QueryKey {
    /// Normalized company name; resolves to a symbol
    Name(String),
    /// Normalized ticker; resolves to a company name
    Symbol(String),
}

impl QueryKey {
    pub fn from_name(name: &str) -> Self {
        Self::Name(normalize_name(name))
    }

    pub fn from_symbol(symbol: &str) -> Self {
        Self::Symbol(normalize_symbol(symbol))
    }

    /// The normalized query string sent to the provider.
    pub fn query(&self) -> &str {
        match self {
            Self::Name(q) | Self::Symbol(q) => q,
        }
    }

    /// The row field this key resolves.
    pub fn wanted_field(&self) -> &'static str {
        match self {
            Self::Name(_) => "symbol",
            Self::Symbol(_) => "name",
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(q) => write!(f, "name:{}", q),
            Self::Symbol(q) => write!(f, "symbol:{}", q),
        }
    }
}

/// Lowercase, trimmed, internal whitespace collapsed.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Uppercase and trimmed.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// A symbol/name pair chosen by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub symbol: String,
    pub name: String,
}

impl ResolvedIdentity {
    pub fn new(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
        }
    }
}

/// Outcome of resolving one key, shared by every row that asked for it.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupResult {
    pub key: QueryKey,
    pub outcome: Result<ResolvedIdentity, LookupError>,
}

/// Who signalled rate-limit exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitSource {
    /// Our own admission gate could not admit the call in time
    Admission,
    /// The provider answered with a rate-limit response
    Provider,
}

/// Machine-readable failure category carried on a failed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InsufficientData,
    NotFound,
    RateLimited,
    Transient,
    Invalid,
    Cancelled,
    Unavailable,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientData => "insufficient_data",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::Invalid => "invalid",
            Self::Cancelled => "cancelled",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Why a row could not be resolved.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LookupError {
    #[error("insufficient data")]
    InsufficientData,

    #[error("No matching {wanted} found for \"{query}\"")]
    NotFound { wanted: &'static str, query: String },

    #[error("{}", rate_limit_message(.0))]
    RateLimited(RateLimitSource),

    #[error("Service temporarily unavailable: {0}")]
    Transient(String),

    #[error("Invalid query: {0}")]
    Invalid(String),

    #[error("cancelled")]
    Cancelled,

    #[error("Lookup service unavailable: {0}")]
    Unavailable(String),
}

fn rate_limit_message(source: &RateLimitSource) -> &'static str {
    match source {
        RateLimitSource::Admission => {
            "Rate limit exceeded: timed out waiting for lookup capacity. Please try again later."
        }
        RateLimitSource::Provider => "API rate limit exceeded. Please try again later.",
    }
}

impl LookupError {
    /// Translate a provider failure for the given key.
    pub fn from_provider(error: ProviderError, key: &QueryKey) -> Self {
        match error {
            ProviderError::NotFound => Self::NotFound {
                wanted: key.wanted_field(),
                query: key.query().to_string(),
            },
            ProviderError::RateLimited => Self::RateLimited(RateLimitSource::Provider),
            ProviderError::Transient(msg) => Self::Transient(msg),
            ProviderError::Invalid(msg) => Self::Invalid(msg),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InsufficientData => FailureKind::InsufficientData,
            Self::NotFound { .. } => FailureKind::NotFound,
            Self::RateLimited(_) => FailureKind::RateLimited,
            Self::Transient(_) => FailureKind::Transient,
            Self::Invalid(_) => FailureKind::Invalid,
            Self::Cancelled => FailureKind::Cancelled,
            Self::Unavailable(_) => FailureKind::Unavailable,
        }
    }

    /// HTTP status the surrounding service reports for this failure.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InsufficientData | Self::Invalid(_) => 400,
            Self::NotFound { .. } => 404,
            Self::RateLimited(_) => 429,
            Self::Cancelled => 499,
            Self::Transient(_) | Self::Unavailable(_) => 503,
        }
    }
}

/// Errors reported by a symbol provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("No match found")]
    NotFound,

    #[error("Rate limited - try again later")]
    RateLimited,

    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Invalid query: {0}")]
    Invalid(String),
}

impl ProviderError {
    /// Only transient failures are worth retrying automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_row() {
        let row = PortfolioRow::new(1, Some("Apple Inc."), Some("AAPL"));
        assert!(row.is_complete());
        assert_eq!(row.eligibility(), Eligibility::Complete);
    }

    #[test]
    fn test_whitespace_counts_as_missing() {
        let row = PortfolioRow::new(1, Some("   "), Some(""));
        assert!(!row.has_name());
        assert!(!row.has_symbol());
        assert_eq!(row.eligibility(), Eligibility::Insufficient);
    }

    #[test]
    fn test_missing_symbol_keys_on_name() {
        let row = PortfolioRow::new(1, Some("  Microsoft   Corporation "), None);
        assert_eq!(
            row.eligibility(),
            Eligibility::Resolve(QueryKey::Name("microsoft corporation".to_string()))
        );
    }

    #[test]
    fn test_missing_name_keys_on_symbol() {
        let row = PortfolioRow::new(1, None, Some(" msft "));
        assert_eq!(
            row.eligibility(),
            Eligibility::Resolve(QueryKey::Symbol("MSFT".to_string()))
        );
    }

    #[test]
    fn test_apply_identity_fills_only_missing() {
        let mut row = PortfolioRow::new(1, Some("Microsoft Corp"), None);
        row.apply_identity(&ResolvedIdentity::new("MSFT", "MICROSOFT CORP"));

        assert_eq!(row.symbol.as_deref(), Some("MSFT"));
        assert_eq!(row.name.as_deref(), Some("Microsoft Corp")); // Kept original
        assert!(row.is_enriched);
        assert_eq!(row.lookup_status, LookupStatus::Success);
    }

    #[test]
    fn test_failure_keeps_enriched_flag() {
        let mut row = PortfolioRow::new(1, Some("Acme"), None);
        row.is_enriched = true;
        row.mark_failed(&LookupError::Cancelled);

        assert!(row.is_enriched);
        assert_eq!(row.lookup_status, LookupStatus::Failed);
        assert_eq!(row.failure_reason.as_deref(), Some("cancelled"));
        assert_eq!(row.failure_kind, Some(FailureKind::Cancelled));
    }

    #[test]
    fn test_pending_clears_previous_failure() {
        let mut row = PortfolioRow::new(1, Some("Acme"), None);
        row.mark_failed(&LookupError::InsufficientData);
        row.mark_pending();

        assert_eq!(row.lookup_status, LookupStatus::Pending);
        assert!(row.failure_reason.is_none());
        assert!(row.failure_kind.is_none());
    }

    #[test]
    fn test_provider_error_translation() {
        let key = QueryKey::from_name("Unknown Tech Co");
        let err = LookupError::from_provider(ProviderError::NotFound, &key);
        assert_eq!(err.kind(), FailureKind::NotFound);
        assert!(err.to_string().contains("unknown tech co"));

        let err = LookupError::from_provider(ProviderError::RateLimited, &key);
        assert_eq!(err, LookupError::RateLimited(RateLimitSource::Provider));
        assert_eq!(err.http_status(), 429);
    }

    #[test]
    fn test_rate_limit_sources_are_distinct() {
        let gate = LookupError::RateLimited(RateLimitSource::Admission);
        let provider = LookupError::RateLimited(RateLimitSource::Provider);
        assert_ne!(gate.to_string(), provider.to_string());
        assert_eq!(gate.kind(), provider.kind());
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ProviderError::Transient("502".into()).is_retryable());
        assert!(!ProviderError::NotFound.is_retryable());
        assert!(!ProviderError::RateLimited.is_retryable());
        assert!(!ProviderError::Invalid("bad".into()).is_retryable());
    }

    #[test]
    fn test_row_json_shape() {
        let json = r#"{"id": 7, "name": "Apple Inc.", "symbol": null, "marketValue": 1200.5}"#;
        let row: PortfolioRow = serde_json::from_str(json).unwrap();
        assert_eq!(row.id, 7);
        assert_eq!(row.market_value, Some(1200.5));
        assert_eq!(row.lookup_status, LookupStatus::NotStarted);

        let out = serde_json::to_string(&row).unwrap();
        assert!(out.contains("\"lookupStatus\":\"not_started\""));
        assert!(out.contains("\"isEnriched\":false"));
        assert!(!out.contains("failureReason"));
    }
}
