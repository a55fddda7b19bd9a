//! Dead letter queue for jobs that exhausted their redelivery attempts
//!
//! Entries keep the original envelope and last error for manual review.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use shared::jobs::{PipelineJob, DEAD_LETTER_QUEUE};

use crate::error::{WorkerError, WorkerResult};

/// Entry in the dead letter queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    /// Original job that failed
    pub job: PipelineJob,
    /// Error message from the last failure
    pub error: String,
    /// When the job was dead-lettered
    pub failed_at: DateTime<Utc>,
}

impl DlqEntry {
    pub fn new(job: PipelineJob, error: String) -> Self {
        Self {
            job,
            error,
            failed_at: Utc::now(),
        }
    }
}

/// Dead letter queue trait for testability
#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    /// Push a failed job to the DLQ
    async fn push(&self, entry: DlqEntry) -> WorkerResult<()>;

    /// Get current DLQ length
    async fn len(&self) -> WorkerResult<u64>;
}

/// Redis-backed dead letter queue
#[derive(Clone)]
pub struct RedisDlq {
    conn: MultiplexedConnection,
}

impl RedisDlq {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl DeadLetterQueue for RedisDlq {
    async fn push(&self, entry: DlqEntry) -> WorkerResult<()> {
        let json = serde_json::to_string(&entry)?;

        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(DEAD_LETTER_QUEUE, &json)
            .await
            .map_err(WorkerError::Redis)?;

        tracing::error!(
            job_id = %entry.job.id,
            kind = %entry.job.kind,
            attempt = entry.job.attempt,
            error = %entry.error,
            "Job moved to dead letter queue"
        );

        Ok(())
    }

    async fn len(&self) -> WorkerResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn
            .llen(DEAD_LETTER_QUEUE)
            .await
            .map_err(WorkerError::Redis)?;
        Ok(len)
    }
}

/// In-memory dead letter queue for tests
#[derive(Default)]
pub struct InMemoryDlq {
    entries: Mutex<Vec<DlqEntry>>,
}

impl InMemoryDlq {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<DlqEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterQueue for InMemoryDlq {
    async fn push(&self, entry: DlqEntry) -> WorkerResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    async fn len(&self) -> WorkerResult<u64> {
        Ok(self.entries.lock().unwrap().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::jobs::{JobKind, SendEmailPayload};

    #[tokio::test]
    async fn test_in_memory_dlq_records_entries() {
        let dlq = InMemoryDlq::new();
        let job = PipelineJob::new(JobKind::SendEmail, &SendEmailPayload { task_id: 9 }).unwrap();

        dlq.push(DlqEntry::new(job.clone(), "mail bounced".to_string()))
            .await
            .unwrap();

        assert_eq!(dlq.len().await.unwrap(), 1);
        let entries = dlq.entries();
        assert_eq!(entries[0].job.id, job.id);
        assert_eq!(entries[0].error, "mail bounced");
    }
}
