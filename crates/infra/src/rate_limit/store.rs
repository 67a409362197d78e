//! Counter store abstraction and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// TTL reported for a key that does not exist (Redis convention).
pub const TTL_MISSING: i64 = -2;

/// TTL reported for a key that exists without an expiry (Redis convention).
pub const TTL_PERSISTENT: i64 = -1;

/// Key-value store offering the three primitives the limiter needs.
///
/// `incr` must be atomic across concurrent callers.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter at `key` (creating it at 0) and return the new value.
    async fn incr(&self, key: &str) -> Result<i64, CounterStoreError>;

    /// Set the key to expire `seconds` from now.
    async fn expire(&self, key: &str, seconds: u64) -> Result<(), CounterStoreError>;

    /// Remaining time-to-live in seconds, or [`TTL_MISSING`] / [`TTL_PERSISTENT`].
    async fn ttl(&self, key: &str) -> Result<i64, CounterStoreError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CounterStoreError {
    #[error("counter store connection error: {0}")]
    Connection(String),
    #[error("counter store command error: {0}")]
    Command(String),
}

#[async_trait]
impl<T: CounterStore + ?Sized> CounterStore for Arc<T> {
    async fn incr(&self, key: &str) -> Result<i64, CounterStoreError> {
        (**self).incr(key).await
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), CounterStoreError> {
        (**self).expire(key, seconds).await
    }

    async fn ttl(&self, key: &str) -> Result<i64, CounterStoreError> {
        (**self).ttl(key).await
    }
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: i64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Minimum time between sweeps of expired counters.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Counters {
    entries: HashMap<String, Counter>,
    last_sweep: Option<Instant>,
}

impl Counters {
    /// Drop expired entries, at most once per [`SWEEP_INTERVAL`].
    fn sweep_expired(&mut self, now: Instant) {
        if self
            .last_sweep
            .is_some_and(|at| now.duration_since(at) < SWEEP_INTERVAL)
        {
            return;
        }
        self.entries.retain(|_, counter| counter.is_live(now));
        self.last_sweep = Some(now);
    }
}

/// In-memory counter store for tests/dev.
///
/// Uses `tokio::time::Instant`, so paused-clock tests can advance windows.
/// Expired counters are swept on increment.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: Mutex<Counters>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of tracked keys, expired or not.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.counters().entries.len()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn incr(&self, key: &str) -> Result<i64, CounterStoreError> {
        let now = Instant::now();
        let mut counters = self.counters();
        counters.sweep_expired(now);
        let counter = counters.entries.entry(key.to_string()).or_insert(Counter {
            value: 0,
            expires_at: None,
        });
        if !counter.is_live(now) {
            *counter = Counter {
                value: 0,
                expires_at: None,
            };
        }
        counter.value += 1;
        Ok(counter.value)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), CounterStoreError> {
        let now = Instant::now();
        let mut counters = self.counters();
        if let Some(counter) = counters.entries.get_mut(key) {
            if counter.is_live(now) {
                counter.expires_at = Some(now + Duration::from_secs(seconds));
            }
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<i64, CounterStoreError> {
        let now = Instant::now();
        let counters = self.counters();
        let ttl = match counters.entries.get(key) {
            Some(counter) if counter.is_live(now) => match counter.expires_at {
                // Round up so a live key never reports 0.
                Some(at) => (at - now).as_millis().div_ceil(1000) as i64,
                None => TTL_PERSISTENT,
            },
            _ => TTL_MISSING,
        };
        Ok(ttl)
    }
}
