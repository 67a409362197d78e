//! Background job queues with retry, backoff and bounded failure retention.
//!
//! ## Design
//!
//! - Two named queues: `email` (`send-email` jobs) and `recipe-generation`
//!   (`generate-recipes` jobs)
//! - Producers enqueue typed payloads and return as soon as the broker has
//!   accepted the job
//! - Retry and retention policy travel with each job as `JobOptions`
//! - Exhausted email jobs are kept (last 100) for inspection; exhausted
//!   recipe jobs are dropped
//!
//! ## Components
//!
//! - `Job`, `JobOptions`: job record and its broker options
//! - `JobBroker`: durable queue port (in-memory or Redis)
//! - `Queue`: typed producer handle with per-queue defaults
//! - `JobWorker`: polls a queue and runs a `JobHandler`
//! - `EmailJobHandler`, `RecipeJobHandler`: the two consumers

pub mod broker;
pub mod handlers;
pub mod payloads;
pub mod queue;
#[cfg(feature = "redis")]
pub mod redis_broker;
pub mod types;
pub mod worker;

pub use broker::{BrokerError, InMemoryJobBroker, JobBroker, QueueCounts};
pub use handlers::{EmailJobHandler, GENERATION_FAILED_MESSAGE, RecipeJobHandler};
pub use payloads::{EmailJob, EmailTemplate, RecipeGenerationJob};
pub use queue::{
    EMAIL_QUEUE, EmailQueue, GENERATE_RECIPES_JOB, Queue, QueueError, RECIPE_GENERATION_QUEUE,
    RecipeGenerationQueue, SEND_EMAIL_JOB,
};
#[cfg(feature = "redis")]
pub use redis_broker::RedisJobBroker;
pub use types::{Backoff, BackoffKind, FailOutcome, Job, JobId, JobOptions, JobState, Retention};
pub use worker::{
    HANDLER_PANICKED, JobError, JobHandler, JobOutcome, JobWorker, JobWorkerConfig, JobWorkerHandle,
    WorkerStats,
};
