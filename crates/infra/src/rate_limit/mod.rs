//! Fixed-window rate limiting.
//!
//! ## Design
//!
//! - One counter per `(identifier, endpoint)` pair, stored under
//!   `rate_limit:{identifier}:{endpoint}`
//! - The first increment of a window sets the key's expiry; later increments
//!   never touch it, so the window is fixed rather than sliding
//! - Atomicity of the increment is the counter store's job (`INCR` in Redis)
//!
//! ## Components
//!
//! - `CounterStore`: the atomic-increment / expire / TTL port
//! - `InMemoryCounterStore`: single-process store for dev and tests
//! - `RedisCounterStore`: shared store for multi-instance deployments
//! - `RateLimiter`: the check itself

pub mod limiter;
#[cfg(feature = "redis")]
pub mod redis;
pub mod store;

pub use limiter::{RateLimitConfig, RateLimitError, RateLimiter, rate_limit_key};
#[cfg(feature = "redis")]
pub use redis::RedisCounterStore;
pub use store::{CounterStore, CounterStoreError, InMemoryCounterStore};
