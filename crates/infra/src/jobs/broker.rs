//! Job broker abstraction and the in-memory implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use super::types::{FailOutcome, Job, JobId, JobOptions, Retention};

/// Durable job broker with named queues.
///
/// Producers only call [`JobBroker::add`]; the remaining methods serve
/// workers and operators.
#[async_trait]
pub trait JobBroker: Send + Sync {
    /// Append a job to `queue`. Returns once the broker has accepted it.
    async fn add(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        options: &JobOptions,
    ) -> Result<JobId, BrokerError>;

    /// Claim the oldest ready job of `queue`, marking it active.
    async fn claim_next(&self, queue: &str) -> Result<Option<Job>, BrokerError>;

    /// Finish an active job successfully and apply `remove_on_complete`.
    async fn complete(&self, job: Job) -> Result<(), BrokerError>;

    /// Record a failed attempt: re-schedule with backoff, or apply
    /// `remove_on_fail` once attempts are exhausted.
    async fn fail(&self, job: Job, reason: &str) -> Result<FailOutcome, BrokerError>;

    /// Most recent retained failures of `queue`, newest first.
    async fn failed(&self, queue: &str, limit: usize) -> Result<Vec<Job>, BrokerError>;

    async fn counts(&self, queue: &str) -> Result<QueueCounts, BrokerError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),
    #[error("broker command error: {0}")]
    Command(String),
    #[error("job serialization error: {0}")]
    Serialization(String),
}

/// Per-queue job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

#[async_trait]
impl<T: JobBroker + ?Sized> JobBroker for Arc<T> {
    async fn add(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        options: &JobOptions,
    ) -> Result<JobId, BrokerError> {
        (**self).add(queue, name, payload, options).await
    }

    async fn claim_next(&self, queue: &str) -> Result<Option<Job>, BrokerError> {
        (**self).claim_next(queue).await
    }

    async fn complete(&self, job: Job) -> Result<(), BrokerError> {
        (**self).complete(job).await
    }

    async fn fail(&self, job: Job, reason: &str) -> Result<FailOutcome, BrokerError> {
        (**self).fail(job, reason).await
    }

    async fn failed(&self, queue: &str, limit: usize) -> Result<Vec<Job>, BrokerError> {
        (**self).failed(queue, limit).await
    }

    async fn counts(&self, queue: &str) -> Result<QueueCounts, BrokerError> {
        (**self).counts(queue).await
    }
}

/// Push `job` onto a newest-first history list according to `policy`.
pub(crate) fn retain(history: &mut VecDeque<Job>, job: Job, policy: Retention) {
    match policy {
        Retention::Remove => {}
        Retention::Keep => history.push_front(job),
        Retention::KeepLast(n) => {
            history.push_front(job);
            history.truncate(n);
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    waiting: VecDeque<Job>,
    delayed: Vec<Job>,
    active: HashMap<JobId, Job>,
    completed: VecDeque<Job>,
    failed: VecDeque<Job>,
}

impl QueueState {
    /// Move delayed jobs whose backoff has elapsed to the waiting list.
    fn promote_due(&mut self) {
        let now = Utc::now();
        let (mut due, pending): (Vec<_>, Vec<_>) =
            self.delayed.drain(..).partition(|j| j.is_ready(now));
        self.delayed = pending;
        due.sort_by_key(|j| j.ready_at);
        self.waiting.extend(due);
    }
}

/// In-memory broker for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobBroker {
    queues: Mutex<HashMap<String, QueueState>>,
}

impl InMemoryJobBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<String, QueueState>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl JobBroker for InMemoryJobBroker {
    async fn add(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        options: &JobOptions,
    ) -> Result<JobId, BrokerError> {
        let job = Job::new(queue, name, payload, *options);
        let id = job.id;
        self.queues()
            .entry(queue.to_string())
            .or_default()
            .waiting
            .push_back(job);
        Ok(id)
    }

    async fn claim_next(&self, queue: &str) -> Result<Option<Job>, BrokerError> {
        let mut queues = self.queues();
        let Some(state) = queues.get_mut(queue) else {
            return Ok(None);
        };
        state.promote_due();

        let Some(mut job) = state.waiting.pop_front() else {
            return Ok(None);
        };
        job.mark_active();
        state.active.insert(job.id, job.clone());
        Ok(Some(job))
    }

    async fn complete(&self, mut job: Job) -> Result<(), BrokerError> {
        let mut queues = self.queues();
        let state = queues.entry(job.queue.clone()).or_default();
        state.active.remove(&job.id);

        job.mark_completed(Utc::now());
        let policy = job.options.remove_on_complete;
        retain(&mut state.completed, job, policy);
        Ok(())
    }

    async fn fail(&self, mut job: Job, reason: &str) -> Result<FailOutcome, BrokerError> {
        let mut queues = self.queues();
        let state = queues.entry(job.queue.clone()).or_default();
        state.active.remove(&job.id);

        let outcome = job.mark_failed(reason, Utc::now());
        match outcome {
            FailOutcome::Retrying { .. } => state.delayed.push(job),
            FailOutcome::Exhausted => {
                let policy = job.options.remove_on_fail;
                retain(&mut state.failed, job, policy);
            }
        }
        Ok(outcome)
    }

    async fn failed(&self, queue: &str, limit: usize) -> Result<Vec<Job>, BrokerError> {
        let queues = self.queues();
        Ok(queues
            .get(queue)
            .map(|s| s.failed.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn counts(&self, queue: &str) -> Result<QueueCounts, BrokerError> {
        let queues = self.queues();
        Ok(queues
            .get(queue)
            .map(|s| QueueCounts {
                waiting: s.waiting.len(),
                delayed: s.delayed.len(),
                active: s.active.len(),
                completed: s.completed.len(),
                failed: s.failed.len(),
            })
            .unwrap_or_default())
    }
}
