//! Cap on calls per rolling time window.
//!
//! Keeps the start time of every call admitted within the last window. A new
//! call is admitted when fewer than `max_calls` starts fall inside the window;
//! otherwise the caller sleeps until the oldest start ages out.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Rolling-window call limiter.
#[derive(Debug, Clone)]
pub struct WindowLimit {
    max_calls: usize,
    window: Duration,
    starts: Arc<Mutex<VecDeque<Instant>>>,
}

impl WindowLimit {
    /// `max_calls` is clamped to at least one call per window.
    pub fn new(max_calls: usize, window: Duration) -> Self {
        let max_calls = max_calls.max(1);
        Self {
            max_calls,
            window,
            starts: Arc::new(Mutex::new(VecDeque::with_capacity(max_calls))),
        }
    }

    /// Record a call if the window has room, otherwise report how long until it will.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut starts = self.starts.lock();

        while let Some(&oldest) = starts.front() {
            if now.duration_since(oldest) >= self.window {
                starts.pop_front();
            } else {
                break;
            }
        }

        if starts.len() < self.max_calls {
            starts.push_back(now);
            return Ok(());
        }

        // Full window: the front entry is the next to age out
        let oldest = starts.front().copied().unwrap_or(now);
        Err(self.window.saturating_sub(now.duration_since(oldest)))
    }

    /// Wait until the window has room, then record the call.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(wait) => {
                    tracing::debug!("Call window full, waiting {:?}", wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Calls recorded within the current window.
    pub fn used(&self) -> usize {
        let now = Instant::now();
        self.starts
            .lock()
            .iter()
            .filter(|start| now.duration_since(**start) < self.window)
            .count()
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
