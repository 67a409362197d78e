//! Redis-backed counter store.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::store::{CounterStore, CounterStoreError};

/// Counter store over a shared Redis connection manager.
///
/// `INCR` is atomic on the server, which is what makes the fixed window safe
/// across API instances.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl RedisCounterStore {
    pub async fn connect(redis_url: &str) -> Result<Self, CounterStoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CounterStoreError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CounterStoreError::Connection(e.to_string()))?;
        debug!("connected rate limit counter store");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str) -> Result<i64, CounterStoreError> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CounterStoreError::Command(format!("INCR {key}: {e}")))?;
        Ok(count)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), CounterStoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| CounterStoreError::Command(format!("EXPIRE {key}: {e}")))?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<i64, CounterStoreError> {
        let mut conn = self.conn.clone();
        let ttl: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CounterStoreError::Command(format!("TTL {key}: {e}")))?;
        Ok(ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::store::TTL_MISSING;

    #[tokio::test]
    #[ignore = "needs a Redis server at REDIS_URL"]
    async fn counter_window_round_trip() {
        let Ok(url) = std::env::var("REDIS_URL") else { return };
        let store = RedisCounterStore::connect(&url).await.unwrap();
        let key = format!("rate_limit:test-{}:password-reset", uuid::Uuid::now_v7());

        assert_eq!(store.ttl(&key).await.unwrap(), TTL_MISSING);
        assert_eq!(store.incr(&key).await.unwrap(), 1);
        store.expire(&key, 60).await.unwrap();
        assert_eq!(store.incr(&key).await.unwrap(), 2);

        let ttl = store.ttl(&key).await.unwrap();
        assert!((1..=60).contains(&ttl), "ttl {ttl}");
    }
}
