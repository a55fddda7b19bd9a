//! Poll job enqueueing
//!
//! The admin surface only ever produces one kind of job: an immediate
//! `poll:comments` on the critical lane. A small trait keeps the handler
//! testable without Redis.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::sync::Mutex;

use shared::jobs::{JobKind, PipelineJob, PollCommentsPayload};

use crate::error::ApiError;

/// Enqueues poll jobs for the pipeline worker
#[async_trait]
pub trait PollEnqueuer: Send + Sync {
    async fn enqueue_poll(&self, note_target: &str) -> Result<(), ApiError>;
}

/// Redis-backed enqueuer; pushes onto the same lane lists the worker
/// consumes
#[derive(Clone)]
pub struct RedisPollEnqueuer {
    conn: MultiplexedConnection,
}

impl RedisPollEnqueuer {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl PollEnqueuer for RedisPollEnqueuer {
    async fn enqueue_poll(&self, note_target: &str) -> Result<(), ApiError> {
        let job = PipelineJob::new(
            JobKind::PollComments,
            &PollCommentsPayload {
                note_target: note_target.to_string(),
            },
        )
        .map_err(|e| ApiError::internal(format!("failed to build poll job: {}", e)))?;

        let json = serde_json::to_string(&job)
            .map_err(|e| ApiError::internal(format!("failed to serialize poll job: {}", e)))?;

        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(job.lane().queue_key(), &json)
            .await
            .map_err(|e| ApiError::internal(format!("failed to enqueue poll job: {}", e)))?;

        tracing::info!(note_target = %note_target, "Poll job enqueued");
        Ok(())
    }
}

/// In-memory enqueuer for handler tests
#[derive(Default)]
pub struct InMemoryPollEnqueuer {
    polls: Mutex<Vec<String>>,
}

impl InMemoryPollEnqueuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn polls(&self) -> Vec<String> {
        self.polls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PollEnqueuer for InMemoryPollEnqueuer {
    async fn enqueue_poll(&self, note_target: &str) -> Result<(), ApiError> {
        self.polls.lock().unwrap().push(note_target.to_string());
        Ok(())
    }
}
