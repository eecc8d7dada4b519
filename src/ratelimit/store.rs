//! Counter store trait for abstracting the shared and in-memory backends.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Result of incrementing a bucket counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// Number of requests counted in the current window, including this one
    pub count: u64,
    /// Time until the current window resets
    pub ttl: Duration,
}

/// Trait for counter store implementations.
///
/// This trait abstracts over the Redis-backed store shared by every instance
/// and the process-local in-memory store used when Redis is unavailable.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key`, starting a new window of length
    /// `window` when none is active.
    async fn increment(&self, key: &str, window: Duration) -> Result<Hit>;

    /// Remove entries whose window has elapsed, returning how many were removed.
    ///
    /// Stores that expire entries on their own keep the default no-op.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }

    /// Short backend name for logging.
    fn backend(&self) -> &'static str;
}
