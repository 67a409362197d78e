use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use pantry_core::DomainError;
use pantry_infra::jobs::{BrokerError, QueueError};
use pantry_infra::rate_limit::RateLimitError;

/// Error returned by handlers; rendered as `{"error": code, "message": msg}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    RateLimited {
        message: String,
        retry_after_seconds: u64,
    },
    #[error("{0}")]
    Validation(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<RateLimitError> for ApiError {
    fn from(err: RateLimitError) -> Self {
        match &err {
            RateLimitError::Exceeded {
                retry_after_seconds,
                ..
            } => Self::RateLimited {
                message: err.to_string(),
                retry_after_seconds: *retry_after_seconds,
            },
            RateLimitError::Store(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::RateLimited {
                message,
                retry_after_seconds,
            } => {
                let mut res = json_error(StatusCode::TOO_MANY_REQUESTS, "rate_limited", message);
                res.headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_seconds));
                res
            }
            ApiError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
            ApiError::Unauthorized => {
                json_error(StatusCode::UNAUTHORIZED, "unauthorized", "unauthorized")
            }
            ApiError::Forbidden => json_error(StatusCode::FORBIDDEN, "forbidden", "forbidden"),
            ApiError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Internal(msg) => {
                error!(error = %msg, "request failed");
                json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error",
                )
            }
        }
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_maps_to_429_with_retry_after() {
        let err = ApiError::from(RateLimitError::Exceeded {
            retry_after_minutes: 2,
            retry_after_seconds: 90,
        });
        let res = err.into_response();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()[header::RETRY_AFTER], "90");
    }

    #[test]
    fn store_failures_are_internal() {
        let err = ApiError::from(RateLimitError::Store(
            pantry_infra::rate_limit::CounterStoreError::Connection("refused".into()),
        ));
        assert!(matches!(err, ApiError::Internal(_)));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn domain_errors_are_bad_requests() {
        let res = ApiError::from(DomainError::validation("bad client id")).into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
