//! `submit:job` — provider submission
//!
//! Hands an extracted request to the selected provider and schedules the
//! first status check 15 seconds out. Entry is idempotent: a task that
//! already advanced past EXTRACTED acknowledges without resubmitting.

use std::str::FromStr;
use std::time::Duration;

use shared::jobs::{CheckStatusPayload, JobKind, PipelineJob, SubmitJobPayload};
use shared::models::{RequestType, TaskStatus};

use crate::error::{WorkerError, WorkerResult};
use crate::provider::{parse_provider_configs, GenRequest};

use super::Pipeline;

/// Delay before the first provider status poll
const FIRST_STATUS_DELAY: Duration = Duration::from_secs(15);

impl Pipeline {
    pub async fn handle_submit_job(&self, payload: SubmitJobPayload) -> WorkerResult<()> {
        tracing::info!(task_id = payload.task_id, "Submitting job");

        let mut task = self.store.get_task(payload.task_id).await?;

        if task.task_status() != Some(TaskStatus::Extracted) {
            tracing::info!(
                task_id = task.id,
                status = %task.status,
                "Task already advanced, skipping submit"
            );
            return Ok(());
        }

        let setting = self.store.get_setting().await?;
        let configs = match parse_provider_configs(&setting.provider_json) {
            Ok(configs) => configs,
            Err(e) => {
                self.fail_task(&mut task, e.to_string()).await;
                return Err(e);
            }
        };

        let selected = match self.select_provider(&configs) {
            Some(selected) => selected,
            None => {
                let err = WorkerError::invalid_state("no providers configured");
                self.fail_task(&mut task, err.to_string()).await;
                return Err(err);
            }
        };

        let provider = match self.providers.get(&selected.provider_name) {
            Some(provider) => provider.clone(),
            None => {
                let err = WorkerError::invalid_state(format!(
                    "provider not found: {}",
                    selected.provider_name
                ));
                self.fail_task(&mut task, err.to_string()).await;
                return Err(err);
            }
        };

        let request_type = match RequestType::from_str(&payload.request_type) {
            Ok(request_type) => request_type,
            Err(e) => {
                let err = WorkerError::invalid_state(e);
                self.fail_task(&mut task, err.to_string()).await;
                return Err(err);
            }
        };

        let request = GenRequest::new(
            format!("task_{}", payload.task_id),
            request_type,
            payload.prompt.clone(),
        );

        let outcome = match provider.submit(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, task_id = task.id, "Provider submit failed");
                self.fail_task(&mut task, e.to_string()).await;
                // Surfaced to the queue in case the failure was transient;
                // redelivery hits the entry check and acknowledges
                return Err(e);
            }
        };

        task.status = TaskStatus::Submitted.as_str().to_string();
        task.provider_name = Some(selected.provider_name.clone());
        task.provider_job_id = Some(outcome.provider_job_id.clone());
        self.store.update_task(&task).await?;

        let job = PipelineJob::new(
            JobKind::CheckStatus,
            &CheckStatusPayload {
                task_id: task.id,
                provider_job_id: outcome.provider_job_id.clone(),
                provider_name: selected.provider_name.clone(),
                retry_count: 0,
            },
        )?;
        if let Err(e) = self.queue.enqueue_in(&job, FIRST_STATUS_DELAY).await {
            tracing::error!(error = %e, task_id = task.id, "Failed to enqueue status check");
        }

        tracing::info!(
            task_id = task.id,
            provider = %selected.provider_name,
            provider_job_id = %outcome.provider_job_id,
            "Job submitted"
        );

        Ok(())
    }
}
