//! Adapter layer: Convert Finnhub DTOs to domain models
//!
//! This is the ONLY place where DTO types are converted to domain types.
//! If Finnhub changes their response format, only this file and dto.rs
//! need to change.

use super::dto;
use crate::enrichment::domain::{ProviderError, ResolvedIdentity};

/// Pick the match for a name search.
///
/// We trust the provider's ranking: an exact (case-insensitive) description
/// match wins, otherwise the first usable result.
pub fn from_search(
    query: &str,
    response: dto::SearchResponse,
) -> Result<ResolvedIdentity, ProviderError> {
    let usable: Vec<dto::SearchMatch> = response
        .result
        .into_iter()
        .filter(|m| !m.symbol.trim().is_empty() && !m.description.trim().is_empty())
        .collect();

    let query = query.trim().to_lowercase();
    let chosen = usable
        .iter()
        .position(|m| m.description.trim().to_lowercase() == query)
        .unwrap_or(0);

    usable
        .into_iter()
        .nth(chosen)
        .map(|m| ResolvedIdentity::new(m.symbol.trim(), m.description.trim()))
        .ok_or(ProviderError::NotFound)
}

/// Convert a company profile for `symbol`.
///
/// An empty profile means the symbol is unknown.
pub fn from_profile(
    symbol: &str,
    profile: dto::CompanyProfile,
) -> Result<ResolvedIdentity, ProviderError> {
    let name = profile
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or(ProviderError::NotFound)?;

    let ticker = profile
        .ticker
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| symbol.to_string());

    Ok(ResolvedIdentity::new(ticker, name))
}

/// Cheap sanity check before spending a request on a symbol.
///
/// 1-9 characters of uppercase letters, digits, `.` or `-`, with at least
/// one letter.
pub fn is_plausible_symbol(symbol: &str) -> bool {
    let len = symbol.chars().count();
    (1..10).contains(&len)
        && symbol
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.' || c == '-')
        && symbol.chars().any(|c| c.is_ascii_uppercase())
}
