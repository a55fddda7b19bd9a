//! Queue consumption runtime
//!
//! N concurrent consumer loops feed jobs into the pipeline. A handler
//! returning a retryable error puts the job back with exponential backoff
//! and a bumped attempt counter; once attempts are exhausted the job is
//! dead-lettered. Permanent errors are acknowledged, their outcome is
//! already recorded on the task row.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use shared::jobs::PipelineJob;

use crate::dlq::{DeadLetterQueue, DlqEntry};
use crate::handlers::Pipeline;
use crate::queue::{JobConsumer, JobQueue};

/// Blocking-pop timeout per consume round
const CONSUME_TIMEOUT_SECS: u64 = 5;

/// Base delay for queue-level redelivery
const RETRY_BASE_SECS: u64 = 5;

/// Delay cap for queue-level redelivery
const RETRY_CAP_SECS: u64 = 60;

/// Redelivery backoff: min(5 × 2^attempt, 60)
fn retry_backoff(attempt: u32) -> Duration {
    let secs = RETRY_BASE_SECS
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(RETRY_CAP_SECS);
    Duration::from_secs(secs)
}

/// Executes consumed jobs and owns the redelivery policy
pub struct JobRunner {
    pipeline: Arc<Pipeline>,
    queue: Arc<dyn JobQueue>,
    dlq: Arc<dyn DeadLetterQueue>,
    max_attempts: u32,
}

impl JobRunner {
    pub fn new(
        pipeline: Arc<Pipeline>,
        queue: Arc<dyn JobQueue>,
        dlq: Arc<dyn DeadLetterQueue>,
        max_attempts: u32,
    ) -> Self {
        Self {
            pipeline,
            queue,
            dlq,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run one job through its handler and settle the outcome
    pub async fn run_job(&self, job: PipelineJob) {
        match self.pipeline.dispatch(&job).await {
            Ok(()) => {
                tracing::debug!(job_id = %job.id, kind = %job.kind, "Job completed");
            }
            Err(e) if e.is_retryable() && job.attempt + 1 < self.max_attempts => {
                let delay = retry_backoff(job.attempt);
                tracing::warn!(
                    job_id = %job.id,
                    kind = %job.kind,
                    attempt = job.attempt + 1,
                    max_attempts = self.max_attempts,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "Job failed, redelivering"
                );
                if let Err(enqueue_err) = self.queue.enqueue_in(&job.next_attempt(), delay).await {
                    tracing::error!(
                        job_id = %job.id,
                        error = %enqueue_err,
                        "Failed to redeliver job, dead-lettering"
                    );
                    let _ = self
                        .dlq
                        .push(DlqEntry::new(job, format!("redelivery failed: {}", e)))
                        .await;
                }
            }
            Err(e) if e.is_retryable() => {
                // Attempts exhausted
                let _ = self.dlq.push(DlqEntry::new(job, e.to_string())).await;
            }
            Err(e) => {
                // Permanent: the task row carries the failure; acknowledge
                tracing::warn!(
                    job_id = %job.id,
                    kind = %job.kind,
                    error = %e,
                    "Job failed permanently, acknowledged"
                );
            }
        }
    }

    /// One consumer loop; runs until cancelled
    pub async fn run_loop(
        self: Arc<Self>,
        consumer: Arc<dyn JobConsumer>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                consumed = consumer.consume(CONSUME_TIMEOUT_SECS) => match consumed {
                    Ok(Some(job)) => self.run_job(job).await,
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Consume failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
            }
        }
        tracing::info!("Worker loop stopped");
    }
}

/// Spawn `concurrency` consumer loops and wait for all of them to drain
pub async fn run_worker_pool(
    runner: Arc<JobRunner>,
    consumer: Arc<dyn JobConsumer>,
    concurrency: u32,
    shutdown: CancellationToken,
) {
    let mut handles = Vec::new();
    for worker in 0..concurrency.max(1) {
        let runner = runner.clone();
        let consumer = consumer.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            tracing::debug!(worker = worker, "Worker loop started");
            runner.run_loop(consumer, shutdown).await;
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker loop panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlq::InMemoryDlq;
    use crate::handlers::testutil::harness;
    use shared::jobs::{JobKind, SendEmailPayload};

    #[test]
    fn test_retry_backoff_schedule() {
        assert_eq!(retry_backoff(0), Duration::from_secs(5));
        assert_eq!(retry_backoff(1), Duration::from_secs(10));
        assert_eq!(retry_backoff(2), Duration::from_secs(20));
        assert_eq!(retry_backoff(3), Duration::from_secs(40));
        assert_eq!(retry_backoff(4), Duration::from_secs(60));
        assert_eq!(retry_backoff(30), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_acknowledged() {
        let h = harness();
        let dlq = Arc::new(InMemoryDlq::new());
        let runner = JobRunner::new(
            Arc::new(h.pipeline),
            h.queue.clone(),
            dlq.clone(),
            5,
        );

        // No task 999 exists: dispatch fails with a permanent error
        let job =
            PipelineJob::new(JobKind::SendEmail, &SendEmailPayload { task_id: 999 }).unwrap();
        runner.run_job(job).await;

        assert!(h.queue.jobs().is_empty());
        assert_eq!(dlq.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_not_redelivered() {
        let h = harness();
        let dlq = Arc::new(InMemoryDlq::new());
        let runner = JobRunner::new(Arc::new(h.pipeline), h.queue.clone(), dlq.clone(), 5);

        let mut job =
            PipelineJob::new(JobKind::SendEmail, &SendEmailPayload { task_id: 1 }).unwrap();
        job.payload = serde_json::json!({"nonsense": true});
        runner.run_job(job).await;

        assert!(h.queue.jobs().is_empty());
        assert_eq!(dlq.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retryable_failure_redelivers_with_backoff() {
        use crate::connector::{CommentPage, Connector};
        use crate::error::{WorkerError, WorkerResult};
        use async_trait::async_trait;

        struct FailingConnector;

        #[async_trait]
        impl Connector for FailingConnector {
            async fn list_comments(&self, _: &str, _: &str) -> WorkerResult<CommentPage> {
                Err(WorkerError::connector("bridge down"))
            }
        }

        let h = harness();
        let pipeline = Pipeline::new(
            h.store.clone(),
            h.queue.clone(),
            Arc::new(FailingConnector),
            crate::intent::IntentExtractor::new(h.llm.clone(), 2),
            Default::default(),
            h.mailer.clone(),
            Arc::new(crate::lock::InMemoryPollLock::new()),
            Arc::new(crate::rate_limiter::NoopRecipientRateLimiter),
        );
        let dlq = Arc::new(InMemoryDlq::new());
        let runner = JobRunner::new(Arc::new(pipeline), h.queue.clone(), dlq.clone(), 3);

        let job = PipelineJob::new(
            JobKind::PollComments,
            &shared::jobs::PollCommentsPayload {
                note_target: "note-1".to_string(),
            },
        )
        .unwrap();

        // Attempt 0 fails -> redelivered with attempt 1 after 5s
        runner.run_job(job.clone()).await;
        let entries = h.queue.take_all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.attempt, 1);
        assert_eq!(entries[0].1, Duration::from_secs(5));
        assert_eq!(dlq.len().await.unwrap(), 0);

        // Attempt 1 fails -> redelivered with attempt 2 after 10s
        runner.run_job(entries[0].0.clone()).await;
        let entries = h.queue.take_all();
        assert_eq!(entries[0].0.attempt, 2);
        assert_eq!(entries[0].1, Duration::from_secs(10));

        // Attempt 2 is the last allowed -> dead-lettered
        runner.run_job(entries[0].0.clone()).await;
        assert!(h.queue.jobs().is_empty());
        assert_eq!(dlq.len().await.unwrap(), 1);
        assert!(dlq.entries()[0].error.contains("bridge down"));
    }
}
