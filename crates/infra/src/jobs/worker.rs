//! Job worker: polls one queue and runs its handler.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::broker::{BrokerError, JobBroker};
use super::types::{FailOutcome, Job};

/// Error returned by a handler for one attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    #[error("invalid job payload: {0}")]
    InvalidPayload(String),
    #[error("{0}")]
    Failed(String),
}

impl From<serde_json::Error> for JobError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}

/// Processes jobs of one queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}

#[async_trait]
impl<T: JobHandler + ?Sized> JobHandler for Arc<T> {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        (**self).handle(job).await
    }
}

/// Job worker configuration.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// How often to poll when the queue is empty
    pub poll_interval: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            name: "job-worker".to_string(),
        }
    }
}

impl JobWorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Outcome of processing one claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(FailOutcome),
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_exhausted: u64,
    pub uptime_secs: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: JobOutcome) {
        self.jobs_processed += 1;
        match outcome {
            JobOutcome::Completed => self.jobs_succeeded += 1,
            JobOutcome::Failed(FailOutcome::Retrying { .. }) => self.jobs_failed += 1,
            JobOutcome::Failed(FailOutcome::Exhausted) => {
                self.jobs_failed += 1;
                self.jobs_exhausted += 1;
            }
        }
    }
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct JobWorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl JobWorkerHandle {
    /// Request graceful shutdown; the job in progress, if any, finishes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "job worker task panicked");
        }
    }

    /// Get current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Background worker for a single queue.
pub struct JobWorker<H> {
    queue: String,
    broker: Arc<dyn JobBroker>,
    handler: Arc<H>,
}

/// Failure reason recorded when a handler panics mid-attempt.
pub const HANDLER_PANICKED: &str = "handler panicked";

impl<H: JobHandler + 'static> JobWorker<H> {
    pub fn new(queue: impl Into<String>, broker: Arc<dyn JobBroker>, handler: H) -> Self {
        Self {
            queue: queue.into(),
            broker,
            handler: Arc::new(handler),
        }
    }

    /// Run the handler on its own task so a panic becomes a failed attempt.
    async fn run_attempt(&self, job: &Job) -> Result<(), JobError> {
        let handler = Arc::clone(&self.handler);
        let attempt = job.clone();
        match tokio::spawn(async move { handler.handle(&attempt).await }).await {
            Ok(result) => result,
            Err(e) => {
                error!(queue = %self.queue, job_id = %job.id, error = %e, "job handler aborted");
                Err(JobError::Failed(HANDLER_PANICKED.to_string()))
            }
        }
    }

    /// Claim and run one job. Returns `None` when the queue has nothing ready.
    pub async fn process_next(&self) -> Result<Option<JobOutcome>, BrokerError> {
        let Some(job) = self.broker.claim_next(&self.queue).await? else {
            return Ok(None);
        };
        debug!(queue = %self.queue, job_id = %job.id, job = %job.name, attempt = job.attempts_made + 1, "claimed job");

        match self.run_attempt(&job).await {
            Ok(()) => {
                let job_id = job.id;
                self.broker.complete(job).await?;
                debug!(queue = %self.queue, job_id = %job_id, "job completed");
                Ok(Some(JobOutcome::Completed))
            }
            Err(e) => {
                let job_id = job.id;
                let reason = e.to_string();
                let outcome = self.broker.fail(job, &reason).await?;
                match outcome {
                    FailOutcome::Retrying { delay } => warn!(
                        queue = %self.queue,
                        job_id = %job_id,
                        error = %reason,
                        retry_in_ms = delay.as_millis() as u64,
                        "job failed; retry scheduled"
                    ),
                    FailOutcome::Exhausted => error!(
                        queue = %self.queue,
                        job_id = %job_id,
                        error = %reason,
                        "job failed; attempts exhausted"
                    ),
                }
                Ok(Some(JobOutcome::Failed(outcome)))
            }
        }
    }

    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(self, config: JobWorkerConfig) -> JobWorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let join = tokio::spawn(worker_loop(self, config, shutdown_rx, stats.clone()));

        JobWorkerHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }
}

async fn worker_loop<H: JobHandler + 'static>(
    worker: JobWorker<H>,
    config: JobWorkerConfig,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<Mutex<WorkerStats>>,
) {
    info!(worker = %config.name, queue = %worker.queue, "job worker started");
    let start_time = Instant::now();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let idle = match worker.process_next().await {
            Ok(Some(outcome)) => {
                let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
                s.record(outcome);
                s.uptime_secs = start_time.elapsed().as_secs();
                false
            }
            Ok(None) => true,
            Err(e) => {
                error!(worker = %config.name, error = %e, "broker error while processing jobs");
                true
            }
        };

        if idle {
            tokio::select! {
                changed = shutdown.changed() => {
                    // Handle dropped without an explicit shutdown.
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
        }
    }

    info!(worker = %config.name, "job worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::jobs::broker::InMemoryJobBroker;
    use crate::jobs::types::{Backoff, JobOptions, Retention};

    struct Succeed;

    #[async_trait]
    impl JobHandler for Succeed {
        async fn handle(&self, _job: &Job) -> Result<(), JobError> {
            Ok(())
        }
    }

    /// Fails the first `failures` attempts, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for Flaky {
        async fn handle(&self, _job: &Job) -> Result<(), JobError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(JobError::Failed(format!("attempt {} failed", n + 1)))
            } else {
                Ok(())
            }
        }
    }

    fn immediate_retries(attempts: u32) -> JobOptions {
        JobOptions {
            attempts,
            backoff: Backoff::fixed(Duration::ZERO),
            remove_on_complete: Retention::Keep,
            remove_on_fail: Retention::Keep,
        }
    }

    #[tokio::test]
    async fn process_next_completes_successful_jobs() {
        let broker = InMemoryJobBroker::arc();
        broker
            .add("email", "send-email", serde_json::json!({}), &immediate_retries(3))
            .await
            .unwrap();

        let worker = JobWorker::new("email", broker.clone(), Succeed);
        assert_eq!(worker.process_next().await.unwrap(), Some(JobOutcome::Completed));
        assert_eq!(worker.process_next().await.unwrap(), None);
        assert_eq!(broker.counts("email").await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn flaky_job_succeeds_on_retry() {
        let broker = InMemoryJobBroker::arc();
        broker
            .add("email", "send-email", serde_json::json!({}), &immediate_retries(3))
            .await
            .unwrap();

        let worker = JobWorker::new(
            "email",
            broker.clone(),
            Flaky {
                failures: 2,
                calls: AtomicU32::new(0),
            },
        );

        for _ in 0..2 {
            assert!(matches!(
                worker.process_next().await.unwrap(),
                Some(JobOutcome::Failed(FailOutcome::Retrying { .. }))
            ));
        }
        assert_eq!(worker.process_next().await.unwrap(), Some(JobOutcome::Completed));
        assert!(broker.failed("email", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn always_failing_job_is_exhausted_after_max_attempts() {
        let broker = InMemoryJobBroker::arc();
        broker
            .add("email", "send-email", serde_json::json!({}), &immediate_retries(3))
            .await
            .unwrap();

        let worker = JobWorker::new(
            "email",
            broker.clone(),
            Flaky {
                failures: u32::MAX,
                calls: AtomicU32::new(0),
            },
        );

        let mut outcomes = Vec::new();
        while let Some(outcome) = worker.process_next().await.unwrap() {
            outcomes.push(outcome);
        }
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[2], JobOutcome::Failed(FailOutcome::Exhausted));
        assert_eq!(broker.failed("email", 10).await.unwrap().len(), 1);
    }

    /// Panics on its first call, succeeds afterwards.
    struct PanicsOnce {
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for PanicsOnce {
        async fn handle(&self, _job: &Job) -> Result<(), JobError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("mailer blew up");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn handler_panic_fails_the_attempt_and_the_worker_keeps_going() {
        let broker = InMemoryJobBroker::arc();
        for n in 0..2 {
            broker
                .add("email", "send-email", serde_json::json!({"n": n}), &immediate_retries(1))
                .await
                .unwrap();
        }

        let handle = JobWorker::new(
            "email",
            broker.clone(),
            PanicsOnce {
                calls: AtomicU32::new(0),
            },
        )
        .spawn(JobWorkerConfig::default().with_poll_interval(Duration::from_millis(5)));

        for _ in 0..200 {
            if handle.stats().jobs_processed == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let stats = handle.stats();
        assert_eq!(stats.jobs_processed, 2);
        assert_eq!(stats.jobs_succeeded, 1);
        assert_eq!(stats.jobs_exhausted, 1);

        let counts = broker.counts("email").await.unwrap();
        assert_eq!(counts.active, 0);
        assert_eq!(counts.waiting, 0);
        let failed = broker.failed("email", 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].failed_reason.as_deref(), Some(HANDLER_PANICKED));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn spawned_worker_drains_queue_and_shuts_down() {
        let broker = InMemoryJobBroker::arc();
        for n in 0..3 {
            broker
                .add("email", "send-email", serde_json::json!({"n": n}), &immediate_retries(1))
                .await
                .unwrap();
        }

        let handle = JobWorker::new("email", broker.clone(), Succeed).spawn(
            JobWorkerConfig::default()
                .with_name("test-worker")
                .with_poll_interval(Duration::from_millis(5)),
        );

        for _ in 0..200 {
            if handle.stats().jobs_succeeded == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handle.stats().jobs_succeeded, 3);
        handle.shutdown().await;
    }
}
