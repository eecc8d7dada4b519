//! Process-local counter store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use super::store::{CounterStore, Hit};
use crate::error::Result;

/// Window end used when `now + window` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A counter for one bucket within its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Requests observed in the current window
    pub count: u64,
    /// When the current window expires
    pub reset_at: Instant,
}

impl RateLimitEntry {
    fn fresh(now: Instant, window: Duration) -> Self {
        Self {
            count: 1,
            reset_at: now.checked_add(window).unwrap_or_else(|| now + FAR_FUTURE),
        }
    }

    /// An entry is treated as absent once its window has elapsed.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.reset_at
    }
}

/// In-memory counter store used when no shared store is reachable.
///
/// Counts are only visible to this process. Increments on the same key are
/// serialized by the map's shard locks.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the live entry for a key, if any.
    pub fn get(&self, key: &str) -> Option<RateLimitEntry> {
        let now = Instant::now();
        self.entries
            .get(key)
            .map(|e| *e)
            .filter(|e| !e.is_expired(now))
    }

    /// Get the number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<Hit> {
        let now = Instant::now();

        let entry = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get_mut();
                if current.is_expired(now) {
                    *current = RateLimitEntry::fresh(now, window);
                } else {
                    current.count += 1;
                }
                *current
            }
            Entry::Vacant(vacant) => *vacant.insert(RateLimitEntry::fresh(now, window)),
        };

        trace!(key = %key, count = entry.count, "Incremented in-memory counter");

        Ok(Hit {
            count: entry.count,
            ttl: entry.reset_at.saturating_duration_since(now),
        })
    }

    async fn purge_expired(&self) -> Result<usize> {
        Ok(self.remove_expired(Instant::now()))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
