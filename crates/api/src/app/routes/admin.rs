//! Operator inspection of queue state and retained failures.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, rejection::QueryRejection},
    routing::get,
};

use pantry_auth::Role;

use crate::app::dto::{FailedJobDto, FailedJobsQuery, QueueOverviewDto};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::UserContext;

pub const DEFAULT_FAILED_LIMIT: usize = 20;
pub const MAX_FAILED_LIMIT: usize = 100;

pub fn router() -> Router {
    Router::new().route("/jobs/:queue", get(queue_overview))
}

/// GET /admin/jobs/:queue
pub async fn queue_overview(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(queue): Path<String>,
    query: Result<Query<FailedJobsQuery>, QueryRejection>,
) -> Result<Json<QueueOverviewDto>, ApiError> {
    if !user.has_role(&Role::ADMIN) {
        return Err(ApiError::Forbidden);
    }
    let Query(query) = query.map_err(|e| ApiError::validation(e.body_text()))?;
    if queue != services.email_queue.name() && queue != services.recipe_queue.name() {
        return Err(ApiError::NotFound(format!("unknown queue {queue:?}")));
    }

    let limit = query.limit.unwrap_or(DEFAULT_FAILED_LIMIT).min(MAX_FAILED_LIMIT);
    let counts = services.broker.counts(&queue).await?;
    let failed = services
        .broker
        .failed(&queue, limit)
        .await?
        .into_iter()
        .map(FailedJobDto::from)
        .collect();

    Ok(Json(QueueOverviewDto {
        queue,
        counts,
        failed,
    }))
}
