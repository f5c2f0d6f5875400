//! Finnhub HTTP client
//!
//! Handles communication with the Finnhub REST API.
//! See: https://finnhub.io/docs/api
//!
//! Authentication is a per-account token sent in the `X-Finnhub-Token`
//! header. The free tier allows 60 calls/minute; exceeding it returns 429.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use super::{adapter, dto};
use crate::enrichment::domain::{ProviderError, QueryKey, ResolvedIdentity};
use crate::enrichment::traits::SymbolProvider;

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://finnhub.io/api/v1";

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// User agent string
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Finnhub API client
pub struct FinnhubClient {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl FinnhubClient {
    /// Create a new client against the public API.
    pub fn new(api_key: impl Into<String>) -> crate::error::Result<Self> {
        Self::with_options(api_key, DEFAULT_BASE_URL, DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom base URL and timeout.
    pub fn with_options(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> crate::error::Result<Self> {
        let http_client = reqwest::Client::builder()
            .gzip(true)
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Find the best symbol for a normalized company name.
    pub async fn search_name(&self, name: &str) -> Result<ResolvedIdentity, ProviderError> {
        let url = format!("{}/search?q={}", self.base_url, urlencoding::encode(name));
        let response: dto::SearchResponse = self.get_json(&url).await?;
        tracing::debug!("Search for {:?} returned {} results", name, response.result.len());
        adapter::from_search(name, response)
    }

    /// Find the company behind a normalized symbol.
    pub async fn company_profile(&self, symbol: &str) -> Result<ResolvedIdentity, ProviderError> {
        if !adapter::is_plausible_symbol(symbol) {
            return Err(ProviderError::Invalid(format!(
                "'{}' is not a valid ticker symbol",
                symbol
            )));
        }

        let url = format!(
            "{}/stock/profile2?symbol={}",
            self.base_url,
            urlencoding::encode(symbol)
        );
        let profile: dto::CompanyProfile = self.get_json(&url).await?;
        adapter::from_profile(symbol, profile)
    }

    /// Send a GET request and decode the JSON body
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let response = self
            .http_client
            .get(url)
            .header("X-Finnhub-Token", &self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Transient(format!("Failed to parse response: {}", e)))
    }
}

/// Map a non-success HTTP status to the provider error taxonomy.
fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    // Finnhub sends {"error": "..."} bodies; fall back to the raw text
    let detail = serde_json::from_str::<dto::ApiError>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    match status {
        StatusCode::NOT_FOUND => ProviderError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
        s if s.is_server_error() => ProviderError::Transient(format!(
            "HTTP {}: {}",
            s.as_u16(),
            s.canonical_reason().unwrap_or("Unknown")
        )),
        s => ProviderError::Invalid(format!("HTTP {}: {}", s.as_u16(), detail)),
    }
}

#[async_trait]
impl SymbolProvider for FinnhubClient {
    async fn lookup(&self, key: &QueryKey) -> Result<ResolvedIdentity, ProviderError> {
        match key {
            QueryKey::Name(name) => self.search_name(name).await,
            QueryKey::Symbol(symbol) => self.company_profile(symbol).await,
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::Invalid(
                "no Finnhub API key configured".to_string(),
            ));
        }
        Ok(())
    }
}
