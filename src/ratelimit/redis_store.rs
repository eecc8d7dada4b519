//! Redis-backed counter store shared by every Marketgate instance.
//!
//! Counting happens in a single Lua script so the increment, the expiry on a
//! new window and the TTL read are atomic across processes. Redis expires keys
//! on its own, so there is nothing to sweep.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;
use tracing::{info, trace};

use super::store::{CounterStore, Hit};
use crate::error::{MarketgateError, Result};

const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if count == 1 or ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Counter store backed by Redis.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Wrap an established connection.
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            script: Script::new(INCREMENT_SCRIPT),
        }
    }

    /// Open a managed connection to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        info!(url = %url, "Connected to Redis counter store");
        Ok(Self::new(connection))
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<Hit> {
        let window_ms = window.as_millis() as u64;
        let mut connection = self.connection.clone();

        let (count, ttl_ms): (i64, i64) = self
            .script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut connection)
            .await?;

        trace!(key = %key, count = count, ttl_ms = ttl_ms, "Incremented Redis counter");

        let count = u64::try_from(count)
            .map_err(|_| MarketgateError::Store(format!("negative count {} for {}", count, key)))?;

        Ok(Hit {
            count,
            ttl: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    /// Live server from `MARKETGATE_TEST_REDIS_URL`, skipped when unset.
    async fn live_store() -> Option<RedisStore> {
        let url = std::env::var("MARKETGATE_TEST_REDIS_URL").ok()?;
        Some(RedisStore::connect(&url).await.unwrap())
    }

    fn unique_key(name: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("marketgate:test:{}:{}:{}", name, std::process::id(), nanos)
    }

    async fn pttl(store: &RedisStore, key: &str) -> i64 {
        let mut connection = store.connection.clone();
        redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut connection)
            .await
            .unwrap()
    }

    async fn delete(store: &RedisStore, key: &str) {
        let mut connection = store.connection.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut connection)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let result = RedisStore::connect("not a redis url").await;
        assert!(matches!(result, Err(MarketgateError::Redis(_))));
    }

    #[tokio::test]
    async fn test_increment_counts_within_one_window() {
        let Some(store) = live_store().await else {
            return;
        };
        let key = unique_key("window");

        let first = store.increment(&key, WINDOW).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(first.ttl, WINDOW);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = store.increment(&key, WINDOW).await.unwrap();
        assert_eq!(second.count, 2);
        assert!(second.ttl < first.ttl, "expiry was reset: {:?}", second.ttl);

        let third = store.increment(&key, WINDOW).await.unwrap();
        assert_eq!(third.count, 3);
        assert!(third.ttl <= second.ttl);

        delete(&store, &key).await;
    }

    #[tokio::test]
    async fn test_increment_repairs_key_without_expiry() {
        let Some(store) = live_store().await else {
            return;
        };
        let key = unique_key("persistent");

        let mut connection = store.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(&key)
            .arg(5)
            .query_async(&mut connection)
            .await
            .unwrap();
        assert_eq!(pttl(&store, &key).await, -1);

        let hit = store.increment(&key, WINDOW).await.unwrap();
        assert_eq!(hit.count, 6);
        assert_eq!(hit.ttl, WINDOW);

        let remaining = pttl(&store, &key).await;
        assert!(remaining > 0 && remaining <= WINDOW.as_millis() as i64);

        delete(&store, &key).await;
    }
}
