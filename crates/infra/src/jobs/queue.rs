//! Named, typed producer handles over a broker.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::broker::{BrokerError, JobBroker};
use super::payloads::{EmailJob, RecipeGenerationJob};
use super::types::{JobId, JobOptions};

pub const EMAIL_QUEUE: &str = "email";
pub const SEND_EMAIL_JOB: &str = "send-email";

pub const RECIPE_GENERATION_QUEUE: &str = "recipe-generation";
pub const GENERATE_RECIPES_JOB: &str = "generate-recipes";

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("failed to encode job payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// A queue accepting payloads of type `P` under a fixed job name.
pub struct Queue<P> {
    name: &'static str,
    job_name: &'static str,
    default_options: JobOptions,
    broker: Arc<dyn JobBroker>,
    _payload: PhantomData<fn(P)>,
}

pub type EmailQueue = Queue<EmailJob>;
pub type RecipeGenerationQueue = Queue<RecipeGenerationJob>;

impl Queue<EmailJob> {
    pub fn email(broker: Arc<dyn JobBroker>) -> Self {
        Self::new(EMAIL_QUEUE, SEND_EMAIL_JOB, JobOptions::email(), broker)
    }
}

impl Queue<RecipeGenerationJob> {
    pub fn recipe_generation(broker: Arc<dyn JobBroker>) -> Self {
        Self::new(
            RECIPE_GENERATION_QUEUE,
            GENERATE_RECIPES_JOB,
            JobOptions::recipe_generation(),
            broker,
        )
    }
}

impl<P: Serialize> Queue<P> {
    pub fn new(
        name: &'static str,
        job_name: &'static str,
        default_options: JobOptions,
        broker: Arc<dyn JobBroker>,
    ) -> Self {
        Self {
            name,
            job_name,
            default_options,
            broker,
            _payload: PhantomData,
        }
    }

    /// Enqueue with the queue's default options.
    pub async fn enqueue(&self, payload: &P) -> Result<JobId, QueueError> {
        self.enqueue_with(payload, &self.default_options).await
    }

    /// Enqueue with explicit options.
    pub async fn enqueue_with(&self, payload: &P, options: &JobOptions) -> Result<JobId, QueueError> {
        let payload = serde_json::to_value(payload)?;
        let id = self
            .broker
            .add(self.name, self.job_name, payload, options)
            .await?;
        debug!(queue = self.name, job = self.job_name, job_id = %id, "job enqueued");
        Ok(id)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

}

impl<P> Clone for Queue<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            job_name: self.job_name,
            default_options: self.default_options,
            broker: Arc::clone(&self.broker),
            _payload: PhantomData,
        }
    }
}

impl<P> fmt::Debug for Queue<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("job_name", &self.job_name)
            .field("default_options", &self.default_options)
            .finish_non_exhaustive()
    }
}
