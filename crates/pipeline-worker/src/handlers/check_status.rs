//! `check:status` — provider status polling
//!
//! Self-chaining poller: each invocation asks the provider once, then
//! either finishes the task, fails it, or re-enqueues itself with the
//! retry counter bumped. The counter travels in the payload so the
//! backoff schedule (15s × 2^n, capped at 60s) survives worker restarts,
//! and the 20-retry bound terminates every submitted task within roughly
//! nineteen minutes.

use std::time::Duration;

use shared::jobs::{CheckStatusPayload, JobKind, PipelineJob, SendEmailPayload};
use shared::models::TaskStatus;

use crate::error::{WorkerError, WorkerResult};
use crate::provider::JobState;

use super::Pipeline;

/// Status polls give up after this many re-checks
const MAX_STATUS_RETRIES: u32 = 20;

/// Base delay of the status backoff schedule
const BASE_BACKOFF_SECS: u64 = 15;

/// Delay cap of the status backoff schedule
const MAX_BACKOFF_SECS: u64 = 60;

/// Backoff before the next status poll: min(15 × 2^retry_count, 60)
fn status_backoff(retry_count: u32) -> Duration {
    let secs = BASE_BACKOFF_SECS
        .saturating_mul(2u64.saturating_pow(retry_count))
        .min(MAX_BACKOFF_SECS);
    Duration::from_secs(secs)
}

impl Pipeline {
    pub async fn handle_check_status(&self, payload: CheckStatusPayload) -> WorkerResult<()> {
        tracing::info!(
            task_id = payload.task_id,
            provider_job_id = %payload.provider_job_id,
            retry_count = payload.retry_count,
            "Checking job status"
        );

        let mut task = self.store.get_task(payload.task_id).await?;

        if matches!(
            task.task_status(),
            Some(TaskStatus::Succeeded) | Some(TaskStatus::Emailed)
        ) {
            tracing::info!(task_id = task.id, "Task already completed");
            return Ok(());
        }

        let provider = self
            .providers
            .get(&payload.provider_name)
            .cloned()
            .ok_or_else(|| {
                WorkerError::invalid_state(format!(
                    "provider not found: {}",
                    payload.provider_name
                ))
            })?;

        // Transport failure fails the job so the queue redelivers it
        let status = provider.status(&payload.provider_job_id).await?;

        match status.state {
            JobState::Succeeded => {
                task.status = TaskStatus::Succeeded.as_str().to_string();
                if let Some(url) = status.result_url {
                    task.result_url = Some(url);
                }
                self.store.update_task(&task).await?;

                let job = PipelineJob::new(
                    JobKind::SendEmail,
                    &SendEmailPayload {
                        task_id: payload.task_id,
                    },
                )?;
                if let Err(e) = self.queue.enqueue(&job).await {
                    tracing::error!(error = %e, task_id = task.id, "Failed to enqueue send email job");
                }

                tracing::info!(task_id = task.id, "Task succeeded");
                Ok(())
            }
            JobState::Failed => {
                let error = status
                    .error
                    .unwrap_or_else(|| "provider reported failure".to_string());
                self.fail_task(&mut task, error).await;
                tracing::info!(task_id = task.id, "Task failed at provider");
                // Terminal; nothing to retry
                Ok(())
            }
            JobState::Pending | JobState::Running => {
                if payload.retry_count >= MAX_STATUS_RETRIES {
                    self.fail_task(&mut task, "max retries exceeded".to_string())
                        .await;
                    tracing::info!(task_id = task.id, "Task failed, max status retries");
                    return Ok(());
                }

                let delay = status_backoff(payload.retry_count);
                let job = PipelineJob::new(
                    JobKind::CheckStatus,
                    &CheckStatusPayload {
                        retry_count: payload.retry_count + 1,
                        ..payload.clone()
                    },
                )?;
                if let Err(e) = self.queue.enqueue_in(&job, delay).await {
                    tracing::error!(error = %e, task_id = task.id, "Failed to re-enqueue status check");
                }

                tracing::debug!(
                    task_id = task.id,
                    progress = status.progress,
                    next_check_secs = delay.as_secs(),
                    "Job still in progress"
                );
                Ok(())
            }
        }
    }
}
