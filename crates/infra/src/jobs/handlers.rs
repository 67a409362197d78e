//! Handlers for the email and recipe-generation queues.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::external::{GeneratorError, Mailer, MailerError, RecipeGenerator, RecipeImage};
use crate::sse::{GenerationMessage, SseNotifier};

use super::payloads::{EmailJob, RecipeGenerationJob};
use super::types::Job;
use super::worker::{JobError, JobHandler};

/// Message pushed to the browser once generation has failed for good.
pub const GENERATION_FAILED_MESSAGE: &str =
    "We couldn't generate recipes from this photo. Please try again with another picture.";

/// Renders `send-email` jobs and hands them to the mailer.
pub struct EmailJobHandler<M> {
    mailer: M,
}

impl<M: Mailer> EmailJobHandler<M> {
    pub fn new(mailer: M) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl<M: Mailer> JobHandler for EmailJobHandler<M> {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let payload: EmailJob = job.payload_as()?;
        let message = payload.to_message();
        self.mailer.send(&message).await.map_err(|e| match e {
            MailerError::Rejected(reason) => JobError::Failed(format!("rejected: {reason}")),
            MailerError::Transport(reason) => JobError::Failed(reason),
        })?;
        debug!(job_id = %job.id, "email sent");
        Ok(())
    }
}

/// Runs `generate-recipes` jobs and pushes the result over SSE.
///
/// Nothing is pushed for an attempt that will be retried; only success or the
/// final failure reach the browser.
pub struct RecipeJobHandler<G> {
    generator: G,
    notifier: Arc<SseNotifier>,
}

impl<G: RecipeGenerator> RecipeJobHandler<G> {
    pub fn new(generator: G, notifier: Arc<SseNotifier>) -> Self {
        Self {
            generator,
            notifier,
        }
    }
}

#[async_trait]
impl<G: RecipeGenerator> JobHandler for RecipeJobHandler<G> {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let payload: RecipeGenerationJob = job.payload_as()?;
        let image = RecipeImage {
            data_base64: &payload.image_base64,
            mime_type: &payload.mime_type,
        };

        let result = self
            .generator
            .generate(image)
            .await
            .and_then(|recipes| {
                if recipes.is_empty() {
                    Err(GeneratorError::NoRecipes)
                } else {
                    Ok(recipes)
                }
            });

        match result {
            Ok(recipes) => {
                info!(
                    job_id = %job.id,
                    user_id = %payload.user_id,
                    recipes = recipes.len(),
                    "recipes generated"
                );
                self.notifier
                    .send_to_client(&payload.client_id, &GenerationMessage::Success { recipes });
                Ok(())
            }
            Err(e) => {
                if job.is_final_attempt() {
                    self.notifier.send_to_client(
                        &payload.client_id,
                        &GenerationMessage::Error {
                            message: GENERATION_FAILED_MESSAGE.to_string(),
                        },
                    );
                }
                Err(JobError::Failed(e.to_string()))
            }
        }
    }
}
