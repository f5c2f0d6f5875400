//! Admission gate for outbound provider calls.
//!
//! Two independent guards apply to every call:
//! - [`ConcurrencyLimit`] bounds how many calls run at once
//! - [`WindowLimit`] bounds how many calls start per rolling window
//!
//! Both apply backpressure: callers wait for capacity rather than being
//! rejected. [`AdmissionGate::acquire_within`] bounds that wait so a caller
//! can give up on one row instead of stalling a whole batch.

mod concurrency;
mod window;

use std::time::Duration;

pub use concurrency::{ConcurrencyLimit, ConcurrencyPermit};
pub use window::WindowLimit;

/// Admission waited longer than the caller's budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Timed out after {waited:?} waiting for provider capacity")]
pub struct AdmissionTimeout {
    pub waited: Duration,
}

/// Gate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateLimits {
    pub max_concurrent: usize,
    pub calls_per_window: usize,
    pub window: Duration,
}

impl Default for GateLimits {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            calls_per_window: 30,
            window: Duration::from_secs(60),
        }
    }
}

/// Proof of admission. The concurrency slot is released on drop.
#[derive(Debug)]
pub struct Permit {
    _slot: ConcurrencyPermit,
}

/// Concurrency cap and rolling-window cap composed.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    concurrency: ConcurrencyLimit,
    window: WindowLimit,
}

impl AdmissionGate {
    pub fn new(limits: GateLimits) -> Self {
        Self {
            concurrency: ConcurrencyLimit::new(limits.max_concurrent),
            window: WindowLimit::new(limits.calls_per_window, limits.window),
        }
    }

    /// Wait until both limits admit a call.
    ///
    /// The concurrency slot is taken first so a caller holding it is the next
    /// to start once the window frees up.
    pub async fn acquire(&self) -> Permit {
        let slot = self.concurrency.acquire().await;
        self.window.acquire().await;
        Permit { _slot: slot }
    }

    /// Like [`acquire`](Self::acquire), but give up after `budget`.
    pub async fn acquire_within(&self, budget: Duration) -> Result<Permit, AdmissionTimeout> {
        tokio::time::timeout(budget, self.acquire())
            .await
            .map_err(|_| AdmissionTimeout { waited: budget })
    }

    /// Return a permit early. Equivalent to dropping it.
    pub fn release(&self, permit: Permit) {
        drop(permit);
    }

    pub fn concurrency(&self) -> &ConcurrencyLimit {
        &self.concurrency
    }

    pub fn window(&self) -> &WindowLimit {
        &self.window
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(GateLimits::default())
    }
}
