//! Account emails: password reset and address verification.

use std::sync::Arc;

use axum::{Extension, Json, extract::rejection::JsonRejection, http::StatusCode};
use tracing::info;
use uuid::Uuid;

use pantry_infra::jobs::{EmailJob, EmailTemplate};

use crate::app::dto::{EmailRequest, JobAccepted, normalize_email};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::UserContext;

/// POST /auth/password-reset
///
/// Rate-limited per email address. Always answers `202` for a well-formed
/// address so callers cannot probe which accounts exist.
pub async fn request_password_reset(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::validation(e.body_text()))?;
    let email = normalize_email(&req.email)
        .ok_or_else(|| ApiError::validation("email must be a valid address"))?;

    services
        .rate_limiter
        .check_rate_limit(&email, &services.rate_limits.password_reset)
        .await?;

    let job = EmailJob {
        to: email,
        user_id: None,
        template: EmailTemplate::PasswordReset {
            reset_url: format!(
                "{}/reset-password?token={}",
                services.public_url,
                Uuid::new_v4().simple()
            ),
        },
    };
    let job_id = services.email_queue.enqueue(&job).await?;
    info!(job_id = %job_id, "password reset email queued");

    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id })))
}

/// POST /auth/verify-email
///
/// Rate-limited per authenticated user.
pub async fn request_email_verification(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    body: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::validation(e.body_text()))?;
    let email = normalize_email(&req.email)
        .ok_or_else(|| ApiError::validation("email must be a valid address"))?;

    services
        .rate_limiter
        .check_rate_limit(
            &user.user_id().to_string(),
            &services.rate_limits.email_verification,
        )
        .await?;

    let job = EmailJob {
        to: email,
        user_id: Some(user.user_id()),
        template: EmailTemplate::EmailVerification {
            verify_url: format!(
                "{}/verify-email?token={}",
                services.public_url,
                Uuid::new_v4().simple()
            ),
        },
    };
    let job_id = services.email_queue.enqueue(&job).await?;
    info!(job_id = %job_id, user_id = %user.user_id(), "verification email queued");

    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id })))
}
