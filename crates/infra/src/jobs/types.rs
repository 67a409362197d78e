//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Same delay before every retry
    Fixed,
    /// `delay * 2^(attempt - 1)`
    Exponential,
}

/// Delay applied before a failed job is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    #[serde(rename = "type")]
    pub kind: BackoffKind,
    /// Base delay
    #[serde(with = "duration_ms")]
    pub delay: Duration,
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            delay,
        }
    }

    pub fn exponential(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay,
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self.kind {
            BackoffKind::Fixed => self.delay,
            BackoffKind::Exponential => self
                .delay
                .saturating_mul(2_u32.saturating_pow(attempt - 1)),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::fixed(Duration::ZERO)
    }
}

/// What the broker keeps once a job reaches a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Delete the job record immediately
    Remove,
    /// Keep every record
    Keep,
    /// Keep only the N most recent records
    KeepLast(usize),
}

/// Per-job broker options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Total attempts, including the first (1 = no retries)
    pub attempts: u32,
    pub backoff: Backoff,
    pub remove_on_complete: Retention,
    pub remove_on_fail: Retention,
}

impl Default for JobOptions {
    /// One attempt, records kept forever.
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff: Backoff::default(),
            remove_on_complete: Retention::Keep,
            remove_on_fail: Retention::Keep,
        }
    }
}

impl JobOptions {
    /// Email delivery: 3 attempts, exponential backoff from 1s, delete on
    /// success, keep the 100 most recent failures.
    pub fn email() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::exponential(Duration::from_millis(1000)),
            remove_on_complete: Retention::Remove,
            remove_on_fail: Retention::KeepLast(100),
        }
    }

    /// Recipe generation: 3 attempts, exponential backoff from 2s, no record
    /// kept either way.
    pub fn recipe_generation() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::exponential(Duration::from_millis(2000)),
            remove_on_complete: Retention::Remove,
            remove_on_fail: Retention::Remove,
        }
    }
}

/// Broker-side job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Ready to be claimed
    Waiting,
    /// Waiting for its backoff to elapse
    Delayed,
    /// Claimed by a worker
    Active,
    Completed,
    /// Exhausted its attempts
    Failed,
}

/// What the broker did with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Re-scheduled after `delay`
    Retrying { delay: Duration },
    /// No attempts left; retention policy applied
    Exhausted,
}

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    /// Job name, used by workers to pick a handler
    pub name: String,
    pub payload: serde_json::Value,
    pub options: JobOptions,
    /// Finished attempts so far
    pub attempts_made: u32,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    /// Earliest time the job may be claimed
    pub ready_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
}

impl Job {
    pub fn new(
        queue: impl Into<String>,
        name: impl Into<String>,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            queue: queue.into(),
            name: name.into(),
            payload,
            options,
            attempts_made: 0,
            state: JobState::Waiting,
            created_at: now,
            ready_at: now,
            finished_at: None,
            failed_reason: None,
        }
    }

    /// Decode the payload into its typed form.
    pub fn payload_as<P: DeserializeOwned>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        now >= self.ready_at
    }

    /// Whether the attempt now running is the last one allowed.
    pub fn is_final_attempt(&self) -> bool {
        self.attempts_made + 1 >= self.options.attempts
    }

    pub fn mark_active(&mut self) {
        self.state = JobState::Active;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.attempts_made += 1;
        self.state = JobState::Completed;
        self.finished_at = Some(now);
        self.failed_reason = None;
    }

    /// Record a failed attempt and decide between retry and exhaustion.
    pub fn mark_failed(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> FailOutcome {
        self.attempts_made += 1;
        self.failed_reason = Some(reason.into());

        if self.attempts_made < self.options.attempts {
            let delay = self.options.backoff.delay_for_attempt(self.attempts_made);
            self.ready_at = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            self.state = JobState::Delayed;
            FailOutcome::Retrying { delay }
        } else {
            self.state = JobState::Failed;
            self.finished_at = Some(now);
            FailOutcome::Exhausted
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_per_attempt() {
        let backoff = Backoff::exponential(Duration::from_millis(1000));

        assert_eq!(backoff.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(4000));
    }

    #[test]
    fn exponential_backoff_saturates_instead_of_overflowing() {
        let backoff = Backoff::exponential(Duration::from_secs(1));
        assert_eq!(
            backoff.delay_for_attempt(200),
            Duration::from_secs(u64::from(u32::MAX))
        );
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let backoff = Backoff::fixed(Duration::from_millis(500));

        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn queue_defaults_match_their_policies() {
        let email = JobOptions::email();
        assert_eq!(email.attempts, 3);
        assert_eq!(email.backoff, Backoff::exponential(Duration::from_millis(1000)));
        assert_eq!(email.remove_on_complete, Retention::Remove);
        assert_eq!(email.remove_on_fail, Retention::KeepLast(100));

        let recipe = JobOptions::recipe_generation();
        assert_eq!(recipe.attempts, 3);
        assert_eq!(recipe.backoff, Backoff::exponential(Duration::from_millis(2000)));
        assert_eq!(recipe.remove_on_complete, Retention::Remove);
        assert_eq!(recipe.remove_on_fail, Retention::Remove);
    }

    #[test]
    fn options_serialize_with_millisecond_delays() {
        let json = serde_json::to_value(JobOptions::email()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "attempts": 3,
                "backoff": {"type": "exponential", "delay": 1000},
                "remove_on_complete": "remove",
                "remove_on_fail": {"keep_last": 100},
            })
        );
    }

    #[test]
    fn job_lifecycle() {
        let mut job = Job::new(
            "email",
            "send-email",
            serde_json::json!({"key": "value"}),
            JobOptions::email(),
        );

        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempts_made, 0);
        assert!(job.is_ready(Utc::now()));

        job.mark_active();
        assert_eq!(job.state, JobState::Active);

        job.mark_completed(Utc::now());
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts_made, 1);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn job_failure_retries_with_backoff_then_exhausts() {
        let mut job = Job::new(
            "recipe-generation",
            "generate-recipes",
            serde_json::json!({}),
            JobOptions::recipe_generation(),
        );
        let now = Utc::now();

        assert!(!job.is_final_attempt());
        let outcome = job.mark_failed("model timeout", now);
        assert_eq!(
            outcome,
            FailOutcome::Retrying {
                delay: Duration::from_millis(2000)
            }
        );
        assert_eq!(job.state, JobState::Delayed);
        assert!(!job.is_ready(now));
        assert!(job.is_ready(now + chrono::Duration::milliseconds(2000)));

        let outcome = job.mark_failed("model timeout", now);
        assert_eq!(
            outcome,
            FailOutcome::Retrying {
                delay: Duration::from_millis(4000)
            }
        );
        assert!(job.is_final_attempt());

        let outcome = job.mark_failed("model timeout", now);
        assert_eq!(outcome, FailOutcome::Exhausted);
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts_made, 3);
        assert_eq!(job.failed_reason.as_deref(), Some("model timeout"));
    }
}
