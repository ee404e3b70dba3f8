use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::job::Job;

/// Queue of regular submissions.
pub const MAIN_QUEUE: &str = "jobs";
/// Lower-priority queue for free-tier submissions.
pub const FREE_QUEUE: &str = "free_jobs";

/// Stored jobs expire after an hour.
const JOB_TTL_SECS: u64 = 3600;

pub fn queue_name(free: bool) -> &'static str {
    if free {
        FREE_QUEUE
    } else {
        MAIN_QUEUE
    }
}

pub fn job_key(id: u64) -> String {
    format!("job:{id}")
}

/// Whether a batch of `incoming` submissions fits under the queue limit.
/// A non-positive limit means unlimited.
pub fn queue_has_capacity(limit: i64, current: i64, incoming: i64) -> bool {
    limit <= 0 || current + incoming <= limit
}

/// Durable job map plus the two FIFO work queues. The redis binding is the
/// production implementation; tests substitute an in-memory one.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically stores the job and appends its ID to the chosen queue.
    async fn enqueue(&self, job: &Job, free: bool) -> Result<()>;

    /// Persists the job record without touching the queues. Used for status
    /// transitions.
    async fn store(&self, job: &Job) -> Result<()>;

    /// Fetches a job by ID; `None` when absent (not an error).
    async fn get(&self, job_id: u64) -> Result<Option<Job>>;

    /// Single-round-trip batch fetch, order-preserving; missing entries are
    /// `None` at their index.
    async fn get_many(&self, ids: &[u64]) -> Result<Vec<Option<Job>>>;

    /// Blocking FIFO pop with a timeout; `None` on timeout and for popped
    /// IDs whose record has expired (those jobs are dropped).
    async fn pop(&self, free: bool, timeout: Duration) -> Result<Option<Job>>;

    /// Current queue length, for admission control.
    async fn queue_length(&self, free: bool) -> Result<i64>;
}

/// Redis-backed job store. Queue entries are job IDs; the record under
/// `job:<id>` is the single source of truth.
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connects via a redis URL and verifies the connection with a ping.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let mut manager = ConnectionManager::new(client)
            .await
            .context("redis connection failed")?;
        redis::cmd("PING")
            .query_async::<()>(&mut manager)
            .await
            .context("redis ping failed")?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl JobStore for RedisStore {
    async fn enqueue(&self, job: &Job, free: bool) -> Result<()> {
        let payload = serde_json::to_string(job).context("encode job")?;
        let mut conn = self.manager.clone();
        // SET and RPUSH must land together so a queued ID always has a
        // record behind it.
        redis::pipe()
            .atomic()
            .set_ex(job_key(job.id), payload, JOB_TTL_SECS)
            .ignore()
            .rpush(queue_name(free), job.id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .context("enqueue pipeline failed")?;
        Ok(())
    }

    async fn store(&self, job: &Job) -> Result<()> {
        let payload = serde_json::to_string(job).context("encode job")?;
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(job_key(job.id), payload, JOB_TTL_SECS)
            .await
            .context("store job failed")?;
        Ok(())
    }

    async fn get(&self, job_id: u64) -> Result<Option<Job>> {
        let mut conn = self.manager.clone();
        let payload: Option<String> = conn
            .get(job_key(job_id))
            .await
            .context("get job failed")?;
        match payload {
            Some(data) => Ok(Some(serde_json::from_str(&data).context("decode job")?)),
            None => Ok(None),
        }
    }

    async fn get_many(&self, ids: &[u64]) -> Result<Vec<Option<Job>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids.iter().map(|id| job_key(*id)).collect();
        let mut conn = self.manager.clone();
        let payloads: Vec<Option<String>> =
            conn.mget(&keys).await.context("batch get failed")?;
        let mut jobs = Vec::with_capacity(ids.len());
        for payload in payloads {
            jobs.push(match payload {
                Some(data) => Some(serde_json::from_str(&data).context("decode job")?),
                None => None,
            });
        }
        Ok(jobs)
    }

    async fn pop(&self, free: bool, timeout: Duration) -> Result<Option<Job>> {
        let mut conn = self.manager.clone();
        let reply: Option<Vec<String>> = conn
            .blpop(queue_name(free), timeout.as_secs_f64())
            .await
            .context("queue pop failed")?;
        let Some(reply) = reply else {
            return Ok(None);
        };
        if reply.len() < 2 {
            bail!("unexpected BLPOP reply: {reply:?}");
        }
        let job_id: u64 = reply[1]
            .parse()
            .with_context(|| format!("malformed job id in queue: {:?}", reply[1]))?;
        // The record may have expired while the ID sat in the queue; such
        // jobs are dropped.
        self.get(job_id).await
    }

    async fn queue_length(&self, free: bool) -> Result<i64> {
        let mut conn = self.manager.clone();
        let length: i64 = conn
            .llen(queue_name(free))
            .await
            .context("queue length failed")?;
        Ok(length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_schema() {
        assert_eq!(job_key(0), "job:0");
        assert_eq!(job_key(18446744073709551615), "job:18446744073709551615");
    }

    #[test]
    fn test_queue_names() {
        assert_eq!(queue_name(false), "jobs");
        assert_eq!(queue_name(true), "free_jobs");
    }

    #[test]
    fn test_queue_capacity() {
        // One slot left: a batch of two is refused, a batch of one fits.
        assert!(!queue_has_capacity(10, 9, 2));
        assert!(queue_has_capacity(10, 9, 1));
        assert!(!queue_has_capacity(10, 10, 1));
        // Zero or negative limit means unlimited.
        assert!(queue_has_capacity(0, 1_000_000, 1));
        assert!(queue_has_capacity(-1, 1_000_000, 1));
    }
}
