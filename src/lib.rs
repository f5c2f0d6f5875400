//! Portfolio Enricher - fills in missing company names and ticker symbols.
//!
//! Portfolio rows often arrive with only one of a company's name or ticker.
//! The [`enrichment`] engine resolves the missing half through a market data
//! provider, caching results, collapsing duplicate requests and keeping the
//! provider inside its rate limits. The [`cli`] module wraps it for CSV files.

pub mod cli;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod portfolio;
