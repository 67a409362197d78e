//! The fixed-window check.

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use super::store::{CounterStore, CounterStoreError};

/// Limits for one protected endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Endpoint name, part of the counter key.
    pub endpoint: String,
    /// Requests allowed per window.
    pub rate_limit: u64,
    /// Window length in seconds.
    pub window_seconds: u64,
}

impl RateLimitConfig {
    pub fn new(endpoint: impl Into<String>, rate_limit: u64, window_seconds: u64) -> Self {
        Self {
            endpoint: endpoint.into(),
            rate_limit,
            window_seconds,
        }
    }

    /// 5 requests per hour.
    pub fn password_reset() -> Self {
        Self::new("password-reset", 5, 3600)
    }

    /// 10 uploads per hour.
    pub fn image_upload() -> Self {
        Self::new("image-upload", 10, 3600)
    }

    /// 5 requests per hour.
    pub fn email_verification() -> Self {
        Self::new("email-verification", 5, 3600)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RateLimitError {
    #[error("Too many requests. Please try again in {retry_after_minutes} {}.", minute_unit(.retry_after_minutes))]
    Exceeded {
        retry_after_minutes: u64,
        retry_after_seconds: u64,
    },
    #[error(transparent)]
    Store(#[from] CounterStoreError),
}

fn minute_unit(minutes: &u64) -> &'static str {
    if *minutes == 1 { "minute" } else { "minutes" }
}

/// Counter key for an identifier/endpoint pair.
pub fn rate_limit_key(identifier: &str, endpoint: &str) -> String {
    format!("rate_limit:{identifier}:{endpoint}")
}

/// Fixed-window rate limiter over an injected counter store.
#[derive(Debug, Clone)]
pub struct RateLimiter<S> {
    store: S,
}

impl<S: CounterStore> RateLimiter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Count one request for `identifier` against `config`.
    ///
    /// Fails with [`RateLimitError::Exceeded`] once the window's count passes
    /// `config.rate_limit`. Store errors are returned as-is.
    #[instrument(skip(self, config), fields(endpoint = %config.endpoint))]
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
    ) -> Result<(), RateLimitError> {
        let key = rate_limit_key(identifier, &config.endpoint);

        let count = self.store.incr(&key).await?;
        if count == 1 {
            self.store.expire(&key, config.window_seconds).await?;
        }

        if count > 0 && count as u64 > config.rate_limit {
            let ttl = self.store.ttl(&key).await?;
            let retry_after_seconds = if ttl > 0 {
                ttl as u64
            } else {
                config.window_seconds
            };
            let retry_after_minutes = retry_after_seconds.div_ceil(60).max(1);

            warn!(
                count,
                limit = config.rate_limit,
                retry_after_seconds,
                "rate limit exceeded"
            );

            return Err(RateLimitError::Exceeded {
                retry_after_minutes,
                retry_after_seconds,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use proptest::prelude::*;

    use super::*;
    use crate::rate_limit::store::InMemoryCounterStore;

    /// Wraps the in-memory store and records every `expire` call.
    #[derive(Default)]
    struct RecordingStore {
        inner: InMemoryCounterStore,
        expires: Mutex<Vec<(String, u64)>>,
    }

    #[async_trait]
    impl CounterStore for RecordingStore {
        async fn incr(&self, key: &str) -> Result<i64, CounterStoreError> {
            self.inner.incr(key).await
        }

        async fn expire(&self, key: &str, seconds: u64) -> Result<(), CounterStoreError> {
            self.expires.lock().unwrap().push((key.to_string(), seconds));
            self.inner.expire(key, seconds).await
        }

        async fn ttl(&self, key: &str) -> Result<i64, CounterStoreError> {
            self.inner.ttl(key).await
        }
    }

    struct UnreachableStore;

    #[async_trait]
    impl CounterStore for UnreachableStore {
        async fn incr(&self, _key: &str) -> Result<i64, CounterStoreError> {
            Err(CounterStoreError::Connection("connection refused".into()))
        }

        async fn expire(&self, _key: &str, _seconds: u64) -> Result<(), CounterStoreError> {
            unreachable!("expire is never reached when incr fails")
        }

        async fn ttl(&self, _key: &str) -> Result<i64, CounterStoreError> {
            unreachable!("ttl is never reached when incr fails")
        }
    }

    fn hourly(limit: u64) -> RateLimitConfig {
        RateLimitConfig::new("image-upload", limit, 3600)
    }

    #[tokio::test]
    async fn calls_up_to_the_limit_succeed_then_fail() {
        let limiter = RateLimiter::new(InMemoryCounterStore::new());
        let config = hourly(10);

        for _ in 0..9 {
            limiter.check_rate_limit("user-1", &config).await.unwrap();
        }
        // 10th call is still within the limit.
        limiter.check_rate_limit("user-1", &config).await.unwrap();

        let err = limiter.check_rate_limit("user-1", &config).await.unwrap_err();
        match err {
            RateLimitError::Exceeded {
                retry_after_minutes,
                retry_after_seconds,
            } => {
                assert_eq!(retry_after_minutes, 60);
                assert!(retry_after_seconds <= 3600 && retry_after_seconds > 3540);
            }
            other => panic!("expected Exceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expiry_is_set_exactly_once_per_window() {
        let limiter = RateLimiter::new(RecordingStore::default());
        let config = hourly(10);

        for _ in 0..5 {
            limiter.check_rate_limit("user-1", &config).await.unwrap();
        }

        let expires = limiter.store().expires.lock().unwrap().clone();
        assert_eq!(
            expires,
            vec![("rate_limit:user-1:image-upload".to_string(), 3600)]
        );
    }

    #[tokio::test]
    async fn identifiers_and_endpoints_have_separate_windows() {
        let limiter = RateLimiter::new(InMemoryCounterStore::new());
        let uploads = hourly(1);
        let resets = RateLimitConfig::new("password-reset", 1, 3600);

        limiter.check_rate_limit("a", &uploads).await.unwrap();
        limiter.check_rate_limit("b", &uploads).await.unwrap();
        limiter.check_rate_limit("a", &resets).await.unwrap();
        assert!(limiter.check_rate_limit("a", &uploads).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn a_new_window_starts_after_expiry() {
        let limiter = RateLimiter::new(InMemoryCounterStore::new());
        let config = RateLimitConfig::new("password-reset", 2, 60);

        limiter.check_rate_limit("a", &config).await.unwrap();
        limiter.check_rate_limit("a", &config).await.unwrap();
        assert!(limiter.check_rate_limit("a", &config).await.is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        limiter.check_rate_limit("a", &config).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_calls_do_not_extend_the_window() {
        let limiter = RateLimiter::new(InMemoryCounterStore::new());
        let config = RateLimitConfig::new("password-reset", 1, 120);

        limiter.check_rate_limit("a", &config).await.unwrap();
        tokio::time::advance(Duration::from_secs(90)).await;

        let err = limiter.check_rate_limit("a", &config).await.unwrap_err();
        assert!(matches!(
            err,
            RateLimitError::Exceeded {
                retry_after_minutes: 1,
                retry_after_seconds: 30
            }
        ));
    }

    #[tokio::test]
    async fn message_reports_whole_minutes_rounded_up() {
        let err = RateLimitError::Exceeded {
            retry_after_minutes: 1,
            retry_after_seconds: 12,
        };
        assert_eq!(
            err.to_string(),
            "Too many requests. Please try again in 1 minute."
        );

        let err = RateLimitError::Exceeded {
            retry_after_minutes: 42,
            retry_after_seconds: 2501,
        };
        assert_eq!(
            err.to_string(),
            "Too many requests. Please try again in 42 minutes."
        );
    }

    #[tokio::test]
    async fn store_errors_propagate_unchanged() {
        let limiter = RateLimiter::new(UnreachableStore);
        let err = limiter.check_rate_limit("a", &hourly(10)).await.unwrap_err();
        assert!(matches!(
            err,
            RateLimitError::Store(CounterStoreError::Connection(_))
        ));
    }

    proptest! {
        #[test]
        fn nth_call_fails_iff_it_exceeds_the_limit(limit in 1u64..20, calls in 1usize..40) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let limiter = RateLimiter::new(InMemoryCounterStore::new());
                let config = RateLimitConfig::new("prop", limit, 3600);
                for n in 1..=calls {
                    let result = limiter.check_rate_limit("id", &config).await;
                    prop_assert_eq!(result.is_err(), n as u64 > limit);
                }
                Ok(())
            })?;
        }
    }
}
