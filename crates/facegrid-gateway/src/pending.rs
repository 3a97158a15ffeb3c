//! PendingResults: results that arrived for requests still waiting on
//! them.
//!
//! The correlator inserts, request handlers take. `take` removes the entry
//! under the lock, so each result is handed to at most one waiter.

use std::collections::HashMap;
use std::time::Duration;

use facegrid_core::{CorrelationId, JobOutcome};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info};

struct Entry {
    outcome: JobOutcome,
    inserted_at: Instant,
}

/// Correlation id → outcome map with wake-ups for waiting requests.
#[derive(Default)]
pub struct PendingResults {
    entries: Mutex<HashMap<CorrelationId, Entry>>,
    /// Woken on every insert.
    inserted: Notify,
}

impl PendingResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result, replacing any earlier one for the same id.
    /// Returns `true` if an entry was replaced.
    pub async fn insert(&self, id: impl Into<CorrelationId>, outcome: JobOutcome) -> bool {
        let id = id.into();
        let replaced = {
            let mut entries = self.entries.lock().await;
            entries
                .insert(
                    id,
                    Entry {
                        outcome,
                        inserted_at: Instant::now(),
                    },
                )
                .is_some()
        };
        self.inserted.notify_waiters();
        replaced
    }

    /// Remove and return the result for `id`, if present.
    pub async fn take(&self, id: &str) -> Option<JobOutcome> {
        self.entries.lock().await.remove(id).map(|e| e.outcome)
    }

    /// Wait up to `timeout` for a result for `id` and take it.
    ///
    /// The waiter wakes on every insert and re-checks at least every
    /// `poll`. The map is checked once more at the deadline before giving
    /// up, so a result that landed exactly then is not missed.
    pub async fn wait_for(&self, id: &str, timeout: Duration, poll: Duration) -> Option<JobOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inserted.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.take(id).await {
                return Some(outcome);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let recheck = deadline.min(now + poll);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(recheck) => {}
            }
        }
    }

    /// Drop entries older than `ttl`. Returns how many were dropped.
    pub async fn evict_expired(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|id, entry| {
            let keep = now.duration_since(entry.inserted_at) < ttl;
            if !keep {
                debug!(correlation_id = %id, "evicting unclaimed result");
            }
            keep
        });
        before - entries.len()
    }

    /// Number of results waiting to be claimed.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Periodically evict unclaimed results until shutdown.
    pub async fn run_sweeper(
        &self,
        ttl: Duration,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let evicted = self.evict_expired(ttl).await;
                    if evicted > 0 {
                        info!(evicted, "evicted unclaimed results");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}
