//! Photo-to-recipe generation: enqueue a job, then stream its result.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use pantry_core::ClientId;
use pantry_infra::jobs::RecipeGenerationJob;

use crate::app::dto::{GenerateRecipesRequest, JobAccepted};
use crate::app::errors::ApiError;
use crate::app::services::{self, AppServices};
use crate::context::UserContext;

/// POST /recipes/generate
pub async fn generate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    body: Result<Json<GenerateRecipesRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::validation(e.body_text()))?;

    services
        .rate_limiter
        .check_rate_limit(&user.user_id().to_string(), &services.rate_limits.image_upload)
        .await?;

    let client_id = ClientId::parse(req.client_id)?;
    let (mime_type, image_base64) = split_data_url(&req.mime_type, &req.image_base64);
    if image_base64.is_empty() {
        return Err(ApiError::validation("image_base64 must not be empty"));
    }
    if !mime_type.starts_with("image/") {
        return Err(ApiError::validation("mime_type must be an image type"));
    }

    let job = RecipeGenerationJob {
        user_id: user.user_id(),
        client_id,
        image_base64: image_base64.to_string(),
        mime_type: mime_type.to_string(),
    };
    let job_id = services.recipe_queue.enqueue(&job).await?;
    info!(job_id = %job_id, user_id = %user.user_id(), client_id = %job.client_id, "recipe generation queued");

    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id })))
}

/// GET /recipes/generate/stream/:client_id
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Path(client_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let client_id = ClientId::parse(client_id)?;
    Ok(services::client_sse_stream(&services, client_id))
}

/// Accept `data:<mime>;base64,<data>` as well as bare base64.
fn split_data_url<'a>(mime_type: &'a str, image: &'a str) -> (&'a str, &'a str) {
    let image = image.trim();
    if let Some(rest) = image.strip_prefix("data:") {
        if let Some((header, data)) = rest.split_once(',') {
            let mime = header.strip_suffix(";base64").unwrap_or(header);
            return (mime, data);
        }
    }
    (mime_type.trim(), image)
}
