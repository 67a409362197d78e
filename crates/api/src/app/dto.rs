//! Request/response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pantry_infra::jobs::{Job, JobId, QueueCounts};

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRecipesRequest {
    /// SSE registration the result will be pushed to
    pub client_id: String,
    pub image_base64: String,
    pub mime_type: String,
}

/// Body of every `202 Accepted` response.
#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub job_id: JobId,
}

#[derive(Debug, Default, Deserialize)]
pub struct FailedJobsQuery {
    pub limit: Option<usize>,
}

/// Retained failure, without its payload.
#[derive(Debug, Serialize)]
pub struct FailedJobDto {
    pub id: JobId,
    pub name: String,
    pub attempts_made: u32,
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<Job> for FailedJobDto {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            name: job.name,
            attempts_made: job.attempts_made,
            failed_reason: job.failed_reason,
            created_at: job.created_at,
            finished_at: job.finished_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QueueOverviewDto {
    pub queue: String,
    pub counts: QueueCounts,
    pub failed: Vec<FailedJobDto>,
}

/// Trim and lowercase an email address; `None` when it cannot be one.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') || email.contains(char::is_whitespace) {
        return None;
    }
    Some(email)
}
