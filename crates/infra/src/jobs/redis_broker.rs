//! Redis-backed job broker.
//!
//! ## Layout
//!
//! For a queue `q` under prefix `p`:
//!
//! - `p:q:wait`: list of ready jobs (RPUSH / LPOP)
//! - `p:q:delayed`: sorted set of jobs in backoff, scored by `ready_at` millis
//! - `p:q:active`: hash of claimed jobs by id
//! - `p:q:completed`, `p:q:failed`: newest-first history lists, trimmed per
//!   the job's retention policy
//!
//! Jobs are stored as their JSON encoding. A job claimed by a worker that
//! dies stays in `active` until an operator re-queues it.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use tracing::{debug, instrument};

use super::broker::{BrokerError, JobBroker, QueueCounts};
use super::types::{FailOutcome, Job, JobId, JobOptions, Retention};

/// Default key prefix.
pub const DEFAULT_PREFIX: &str = "pantry:jobs";

#[derive(Clone)]
pub struct RedisJobBroker {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisJobBroker {
    pub async fn connect(redis_url: &str, prefix: Option<String>) -> Result<Self, BrokerError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| BrokerError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        debug!("connected job broker");
        Ok(Self::from_connection(conn, prefix))
    }

    fn from_connection(conn: ConnectionManager, prefix: Option<String>) -> Self {
        Self {
            conn,
            prefix: prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
        }
    }

    fn key(&self, queue: &str, part: &str) -> String {
        format!("{}:{}:{}", self.prefix, queue, part)
    }

    /// Push `json` onto a history list honouring `policy`.
    async fn retain(&self, list_key: &str, json: &str, policy: Retention) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        match policy {
            Retention::Remove => Ok(()),
            Retention::Keep => {
                let _: i64 = redis::cmd("LPUSH")
                    .arg(list_key)
                    .arg(json)
                    .query_async(&mut conn)
                    .await
                    .map_err(command_error)?;
                Ok(())
            }
            Retention::KeepLast(0) => Ok(()),
            Retention::KeepLast(n) => {
                let _: () = redis::pipe()
                    .atomic()
                    .cmd("LPUSH")
                    .arg(list_key)
                    .arg(json)
                    .ignore()
                    .cmd("LTRIM")
                    .arg(list_key)
                    .arg(0)
                    .arg(last_index(n))
                    .ignore()
                    .query_async(&mut conn)
                    .await
                    .map_err(command_error)?;
                Ok(())
            }
        }
    }

    async fn deactivate(&self, job: &Job) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("HDEL")
            .arg(self.key(&job.queue, "active"))
            .arg(job.id.to_string())
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn promote_due(&self, queue: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let delayed_key = self.key(queue, "delayed");
        let wait_key = self.key(queue, "wait");
        let now_ms = Utc::now().timestamp_millis();

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&delayed_key)
            .arg("-inf")
            .arg(now_ms)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        for member in due {
            // ZREM first so two workers cannot both promote the same job.
            let removed: i64 = redis::cmd("ZREM")
                .arg(&delayed_key)
                .arg(&member)
                .query_async(&mut conn)
                .await
                .map_err(command_error)?;
            if removed == 1 {
                let _: i64 = redis::cmd("RPUSH")
                    .arg(&wait_key)
                    .arg(&member)
                    .query_async(&mut conn)
                    .await
                    .map_err(command_error)?;
            }
        }
        Ok(())
    }
}

/// Inclusive end index for the first `n` list elements; `-1` (the list end)
/// when `n` does not fit in an `i64`.
fn last_index(n: usize) -> i64 {
    i64::try_from(n).map_or(-1, |n| n - 1)
}

fn command_error(e: redis::RedisError) -> BrokerError {
    BrokerError::Command(e.to_string())
}

fn encode(job: &Job) -> Result<String, BrokerError> {
    serde_json::to_string(job).map_err(|e| BrokerError::Serialization(e.to_string()))
}

fn decode(json: &str) -> Result<Job, BrokerError> {
    serde_json::from_str(json).map_err(|e| BrokerError::Serialization(e.to_string()))
}

#[async_trait]
impl JobBroker for RedisJobBroker {
    #[instrument(skip(self, payload, options), err)]
    async fn add(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        options: &JobOptions,
    ) -> Result<JobId, BrokerError> {
        let job = Job::new(queue, name, payload, *options);
        let json = encode(&job)?;

        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("RPUSH")
            .arg(self.key(queue, "wait"))
            .arg(json)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(job.id)
    }

    async fn claim_next(&self, queue: &str) -> Result<Option<Job>, BrokerError> {
        self.promote_due(queue).await?;

        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("LPOP")
            .arg(self.key(queue, "wait"))
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let mut job = decode(&raw)?;
        job.mark_active();
        let _: i64 = redis::cmd("HSET")
            .arg(self.key(queue, "active"))
            .arg(job.id.to_string())
            .arg(encode(&job)?)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(Some(job))
    }

    async fn complete(&self, mut job: Job) -> Result<(), BrokerError> {
        self.deactivate(&job).await?;
        job.mark_completed(Utc::now());
        let policy = job.options.remove_on_complete;
        self.retain(&self.key(&job.queue, "completed"), &encode(&job)?, policy)
            .await
    }

    async fn fail(&self, mut job: Job, reason: &str) -> Result<FailOutcome, BrokerError> {
        self.deactivate(&job).await?;
        let outcome = job.mark_failed(reason, Utc::now());
        let json = encode(&job)?;

        match outcome {
            FailOutcome::Retrying { .. } => {
                let mut conn = self.conn.clone();
                let _: i64 = redis::cmd("ZADD")
                    .arg(self.key(&job.queue, "delayed"))
                    .arg(job.ready_at.timestamp_millis())
                    .arg(json)
                    .query_async(&mut conn)
                    .await
                    .map_err(command_error)?;
            }
            FailOutcome::Exhausted => {
                let policy = job.options.remove_on_fail;
                self.retain(&self.key(&job.queue, "failed"), &json, policy)
                    .await?;
            }
        }
        Ok(outcome)
    }

    async fn failed(&self, queue: &str, limit: usize) -> Result<Vec<Job>, BrokerError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(self.key(queue, "failed"))
            .arg(0)
            .arg(last_index(limit))
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        raw.iter().map(|r| decode(r)).collect()
    }

    async fn counts(&self, queue: &str) -> Result<QueueCounts, BrokerError> {
        let mut conn = self.conn.clone();
        let (waiting, delayed, active, completed, failed): (usize, usize, usize, usize, usize) =
            redis::pipe()
                .cmd("LLEN")
                .arg(self.key(queue, "wait"))
                .cmd("ZCARD")
                .arg(self.key(queue, "delayed"))
                .cmd("HLEN")
                .arg(self.key(queue, "active"))
                .cmd("LLEN")
                .arg(self.key(queue, "completed"))
                .cmd("LLEN")
                .arg(self.key(queue, "failed"))
                .query_async(&mut conn)
                .await
                .map_err(command_error)?;
        Ok(QueueCounts {
            waiting,
            delayed,
            active,
            completed,
            failed,
        })
    }
}
