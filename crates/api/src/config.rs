//! Process configuration, read once at startup.

use std::net::SocketAddr;
use std::time::Duration;

use pantry_infra::rate_limit::RateLimitConfig;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEV_JWT_SECRET: &str = "dev-secret";
pub const DEFAULT_PUBLIC_URL: &str = "http://localhost:5173";
pub const DEFAULT_WORKER_POLL_INTERVAL_MS: u64 = 250;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}: {message}")]
    Invalid { key: &'static str, message: String },
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

/// Rate-limit settings for each guarded endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimits {
    pub password_reset: RateLimitConfig,
    pub image_upload: RateLimitConfig,
    pub email_verification: RateLimitConfig,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            password_reset: RateLimitConfig::password_reset(),
            image_upload: RateLimitConfig::image_upload(),
            email_verification: RateLimitConfig::email_verification(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    /// When unset, counters and jobs live in process memory.
    pub redis_url: Option<String>,
    /// Frontend origin used to build links in outgoing emails
    pub public_url: String,
    pub rate_limits: RateLimits,
    pub worker_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            redis_url: None,
            public_url: DEFAULT_PUBLIC_URL.to_string(),
            rate_limits: RateLimits::default(),
            worker_poll_interval: Duration::from_millis(DEFAULT_WORKER_POLL_INTERVAL_MS),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = get("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::invalid("BIND_ADDR", e.to_string()))?;

        let jwt_secret = get("JWT_SECRET").unwrap_or_else(|| {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        let defaults = RateLimits::default();
        let rate_limits = RateLimits {
            password_reset: rate_limit_from(
                "RATE_LIMIT_PASSWORD_RESET",
                get("RATE_LIMIT_PASSWORD_RESET"),
                defaults.password_reset,
            )?,
            image_upload: rate_limit_from(
                "RATE_LIMIT_IMAGE_UPLOAD",
                get("RATE_LIMIT_IMAGE_UPLOAD"),
                defaults.image_upload,
            )?,
            email_verification: rate_limit_from(
                "RATE_LIMIT_EMAIL_VERIFICATION",
                get("RATE_LIMIT_EMAIL_VERIFICATION"),
                defaults.email_verification,
            )?,
        };

        let worker_poll_interval = match get("WORKER_POLL_INTERVAL_MS") {
            None => Duration::from_millis(DEFAULT_WORKER_POLL_INTERVAL_MS),
            Some(raw) => {
                let ms = raw.trim().parse::<u64>().map_err(|e| {
                    ConfigError::invalid("WORKER_POLL_INTERVAL_MS", e.to_string())
                })?;
                if ms == 0 {
                    return Err(ConfigError::invalid(
                        "WORKER_POLL_INTERVAL_MS",
                        "must be greater than zero",
                    ));
                }
                Duration::from_millis(ms)
            }
        };

        Ok(Self {
            bind_addr,
            jwt_secret,
            redis_url: get("REDIS_URL"),
            public_url: get("PUBLIC_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_PUBLIC_URL.to_string()),
            rate_limits,
            worker_poll_interval,
        })
    }
}

/// Parse `limit/window_seconds`, keeping the endpoint name of `default`.
fn rate_limit_from(
    key: &'static str,
    raw: Option<String>,
    default: RateLimitConfig,
) -> Result<RateLimitConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let (limit, window) = raw
        .trim()
        .split_once('/')
        .ok_or_else(|| ConfigError::invalid(key, format!("expected limit/window_seconds, got {raw:?}")))?;
    let limit = limit
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::invalid(key, format!("limit: {e}")))?;
    let window = window
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::invalid(key, format!("window: {e}")))?;
    if window == 0 {
        return Err(ConfigError::invalid(key, "window must be greater than zero"));
    }
    Ok(RateLimitConfig::new(default.endpoint, limit, window))
}
