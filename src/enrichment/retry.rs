//! Bounded retry for transient provider failures.

use std::time::Duration;

use async_trait::async_trait;

use super::domain::{ProviderError, QueryKey, ResolvedIdentity};
use super::traits::SymbolProvider;

/// How often and how long to back off between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each time after
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (0-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Wraps a provider and retries `Transient` failures.
///
/// Every other outcome is returned to the caller immediately.
pub struct RetryingProvider<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: SymbolProvider> RetryingProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: SymbolProvider> SymbolProvider for RetryingProvider<P> {
    async fn lookup(&self, key: &QueryKey) -> Result<ResolvedIdentity, ProviderError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match self.inner.lookup(key).await {
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    let wait = self.policy.delay_after(attempt);
                    tracing::warn!(
                        "Lookup for {} failed ({}), retrying in {:?} (attempt {}/{})",
                        key,
                        err,
                        wait,
                        attempt + 1,
                        attempts
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.inner.health_check().await
    }
}
