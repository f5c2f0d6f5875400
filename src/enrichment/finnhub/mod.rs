//! Finnhub API integration
//!
//! Resolves company names to ticker symbols via symbol search, and symbols
//! to company names via the company profile endpoint.
//!
//! API docs: https://finnhub.io/docs/api

pub mod dto;
mod adapter;
mod client;

pub use adapter::is_plausible_symbol;
pub use client::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT, FinnhubClient};
