//! Lane-based job queue over Redis
//!
//! Three Redis lists back the named lanes; delayed jobs park in a sorted
//! set scored by their ready-at time and are promoted into their lane
//! before each consume. Dispatch across lanes is weighted (critical:6,
//! default:3, low:1) so a burst of low-priority work cannot starve the
//! poll/submit/send path.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use shared::jobs::{Lane, PipelineJob, SCHEDULED_SET};

use crate::error::{WorkerError, WorkerResult};

/// How many due jobs are promoted from the scheduled set per consume
const PROMOTE_BATCH: isize = 100;

/// Producer side of the queue
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job on its lane for immediate dispatch
    async fn enqueue(&self, job: &PipelineJob) -> WorkerResult<()>;

    /// Enqueue a job that becomes ready after `delay`
    async fn enqueue_in(&self, job: &PipelineJob, delay: Duration) -> WorkerResult<()>;
}

/// Consumer side of the queue
#[async_trait]
pub trait JobConsumer: Send + Sync {
    /// Block up to `timeout_secs` waiting for the next job
    ///
    /// Returns `None` on timeout.
    async fn consume(&self, timeout_secs: u64) -> WorkerResult<Option<PipelineJob>>;
}

/// Redis-backed producer
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: MultiplexedConnection,
}

impl RedisJobQueue {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &PipelineJob) -> WorkerResult<()> {
        let json = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(job.lane().queue_key(), &json)
            .await
            .map_err(WorkerError::Redis)?;

        tracing::debug!(
            job_id = %job.id,
            kind = %job.kind,
            lane = %job.lane(),
            "Enqueued job"
        );

        Ok(())
    }

    async fn enqueue_in(&self, job: &PipelineJob, delay: Duration) -> WorkerResult<()> {
        if delay.is_zero() {
            return self.enqueue(job).await;
        }

        let json = serde_json::to_string(job)?;
        let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(SCHEDULED_SET, &json, ready_at)
            .await
            .map_err(WorkerError::Redis)?;

        tracing::debug!(
            job_id = %job.id,
            kind = %job.kind,
            delay_ms = delay.as_millis() as u64,
            "Scheduled delayed job"
        );

        Ok(())
    }
}

/// Redis-backed consumer with weighted lane dispatch
pub struct RedisJobConsumer {
    conn: MultiplexedConnection,
    /// Lane rotation expanded from the configured weights
    schedule: Vec<Lane>,
    cursor: AtomicUsize,
}

/// Expand lane weights into a dispatch rotation
fn build_schedule(weights: (u32, u32, u32)) -> Vec<Lane> {
    let (critical, default, low) = weights;
    let mut schedule = Vec::new();
    for _ in 0..critical.max(1) {
        schedule.push(Lane::Critical);
    }
    for _ in 0..default.max(1) {
        schedule.push(Lane::Default);
    }
    for _ in 0..low.max(1) {
        schedule.push(Lane::Low);
    }
    schedule
}

impl RedisJobConsumer {
    pub fn new(conn: MultiplexedConnection, weights: (u32, u32, u32)) -> Self {
        Self {
            conn,
            schedule: build_schedule(weights),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Move due jobs from the scheduled set into their lanes
    async fn promote_due(&self) -> WorkerResult<()> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(SCHEDULED_SET)
            .arg("-inf")
            .arg(now)
            .arg("LIMIT")
            .arg(0)
            .arg(PROMOTE_BATCH)
            .query_async(&mut conn)
            .await
            .map_err(WorkerError::Redis)?;

        for json in due {
            // ZREM returning 0 means a sibling consumer promoted it first
            let removed: i64 = conn
                .zrem(SCHEDULED_SET, &json)
                .await
                .map_err(WorkerError::Redis)?;
            if removed == 0 {
                continue;
            }

            match serde_json::from_str::<PipelineJob>(&json) {
                Ok(job) => {
                    conn.lpush::<_, _, ()>(job.lane().queue_key(), &json)
                        .await
                        .map_err(WorkerError::Redis)?;
                    tracing::debug!(job_id = %job.id, kind = %job.kind, "Promoted delayed job");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping unparseable scheduled job");
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl JobConsumer for RedisJobConsumer {
    async fn consume(&self, timeout_secs: u64) -> WorkerResult<Option<PipelineJob>> {
        self.promote_due().await?;

        let mut conn = self.conn.clone();

        // Weighted pass: walk the rotation starting at the cursor so the
        // critical lane gets its share without starving the others.
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % self.schedule.len();
        let mut tried = [false; 3];
        for offset in 0..self.schedule.len() {
            let lane = self.schedule[(start + offset) % self.schedule.len()];
            let slot = match lane {
                Lane::Critical => 0,
                Lane::Default => 1,
                Lane::Low => 2,
            };
            if tried[slot] {
                continue;
            }
            tried[slot] = true;

            let popped: Option<String> = conn
                .rpop(lane.queue_key(), None)
                .await
                .map_err(WorkerError::Redis)?;
            if let Some(json) = popped {
                let job: PipelineJob = serde_json::from_str(&json)?;
                tracing::debug!(job_id = %job.id, kind = %job.kind, lane = %lane, "Consumed job");
                return Ok(Some(job));
            }
        }

        // Everything empty: block across all lanes until work arrives or
        // the timeout elapses. Keys are listed critical-first so BRPOP's
        // left-to-right preference matches the lane priority.
        let keys = [
            Lane::Critical.queue_key(),
            Lane::Default.queue_key(),
            Lane::Low.queue_key(),
        ];
        let result: Option<(String, String)> = conn
            .brpop(&keys[..], timeout_secs as f64)
            .await
            .map_err(WorkerError::Redis)?;

        match result {
            Some((_, json)) => {
                let job: PipelineJob = serde_json::from_str(&json)?;
                tracing::debug!(job_id = %job.id, kind = %job.kind, "Consumed job");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }
}

/// In-memory queue recording enqueues, for handler tests
#[derive(Default)]
pub struct InMemoryJobQueue {
    jobs: Mutex<Vec<(PipelineJob, Duration)>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// All enqueued jobs with their requested delays
    pub fn entries(&self) -> Vec<(PipelineJob, Duration)> {
        self.jobs.lock().unwrap().clone()
    }

    /// All enqueued jobs, delays discarded
    pub fn jobs(&self) -> Vec<PipelineJob> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .map(|(job, _)| job.clone())
            .collect()
    }

    /// Drain everything recorded so far
    pub fn take_all(&self) -> Vec<(PipelineJob, Duration)> {
        std::mem::take(&mut *self.jobs.lock().unwrap())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: &PipelineJob) -> WorkerResult<()> {
        self.jobs
            .lock()
            .unwrap()
            .push((job.clone(), Duration::ZERO));
        Ok(())
    }

    async fn enqueue_in(&self, job: &PipelineJob, delay: Duration) -> WorkerResult<()> {
        self.jobs.lock().unwrap().push((job.clone(), delay));
        Ok(())
    }
}
