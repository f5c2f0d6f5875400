//! Collapses concurrent requests for the same key into one provider call.
//!
//! The first caller for a key becomes the leader: its fetch runs on a spawned
//! task and publishes the result through a `watch` channel. Callers arriving
//! while that task runs subscribe to the same channel instead of fetching.
//! The map entry is removed once the result is published, so a later request
//! starts a fresh resolution.
//!
//! Because the fetch is spawned, it finishes even if every waiting caller is
//! dropped, and whatever it writes to the cache is kept.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::domain::{LookupError, LookupResult, QueryKey};

type Slot = watch::Receiver<Option<LookupResult>>;

/// In-flight resolution registry.
#[derive(Clone, Default)]
pub struct Deduplicator {
    inflight: Arc<Mutex<HashMap<QueryKey, Slot>>>,
}

/// Removes the map entry when the fetch task ends, even by panic.
struct InflightGuard {
    inflight: Arc<Mutex<HashMap<QueryKey, Slot>>>,
    key: QueryKey,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.inflight.lock().remove(&self.key);
    }
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `key`, running `fetch` only if no resolution is already in flight.
    ///
    /// Every concurrent caller for the same key receives the same result.
    pub async fn resolve<F, Fut>(&self, key: QueryKey, fetch: F) -> LookupResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LookupResult> + Send + 'static,
    {
        let (mut rx, leader_tx) = {
            let mut inflight = self.inflight.lock();
            match inflight.get(&key) {
                Some(rx) => (rx.clone(), None),
                None => {
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(key.clone(), rx.clone());
                    (rx, Some(tx))
                }
            }
        };

        match leader_tx {
            Some(tx) => {
                let guard = InflightGuard {
                    inflight: Arc::clone(&self.inflight),
                    key: key.clone(),
                };
                let task = fetch();
                tokio::spawn(async move {
                    let result = task.await;
                    // Unregister first so nobody joins an already-finished resolution
                    drop(guard);
                    let _ = tx.send(Some(result));
                });
            }
            None => tracing::debug!("Joining in-flight resolution for {}", key),
        }

        let published = rx.wait_for(Option::is_some).await.ok().and_then(|r| r.clone());
        published.unwrap_or_else(|| LookupResult {
            outcome: Err(LookupError::Transient(
                "resolution task ended without a result".to_string(),
            )),
            key,
        })
    }

    /// Number of keys currently being resolved.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }

    pub fn is_in_flight(&self, key: &QueryKey) -> bool {
        self.inflight.lock().contains_key(key)
    }
}
