//! Finnhub API Data Transfer Objects
//!
//! These types match what the Finnhub API returns.
//! DO NOT use these types outside the finnhub module - convert to domain types.
//!
//! API Reference: https://finnhub.io/docs/api
//!
//! We use two endpoints:
//! - `/search` to find symbols for a company name
//! - `/stock/profile2` to find the company behind a symbol

use serde::{Deserialize, Serialize};

/// Symbol search response
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SearchResponse {
    /// Number of results
    #[serde(default)]
    pub count: u32,
    /// Matches in the provider's ranking order
    #[serde(default)]
    pub result: Vec<SearchMatch>,
}

/// One symbol search match
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMatch {
    /// Company description (usually the upper-cased company name)
    #[serde(default)]
    pub description: String,
    /// Symbol as displayed (may include exchange suffix)
    #[serde(default)]
    pub display_symbol: String,
    /// Unique symbol used by other endpoints
    #[serde(default)]
    pub symbol: String,
    /// Security type (Common Stock, ETP, ADR, ...)
    #[serde(rename = "type", default)]
    pub security_type: String,
}

/// Company profile response.
///
/// Unknown symbols return an empty object, so every field is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyProfile {
    pub name: Option<String>,
    pub ticker: Option<String>,
    pub exchange: Option<String>,
    pub country: Option<String>,
    pub currency: Option<String>,
    pub finnhub_industry: Option<String>,
    pub ipo: Option<String>,
    pub weburl: Option<String>,
    pub market_capitalization: Option<f64>,
}

/// Error body returned with non-2xx responses
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiError {
    pub error: String,
}
