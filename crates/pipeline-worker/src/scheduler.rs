//! Poll scheduler
//!
//! Pure producer: every polling interval it enqueues one `poll:comments`
//! job for the configured note target on the critical lane. The settings
//! row is re-read each tick so interval and target changes made through
//! the admin surface take effect without a restart.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use shared::jobs::{JobKind, PipelineJob, PollCommentsPayload};
use shared::Store;

use crate::queue::JobQueue;

/// Floor on the polling interval; the admin surface validates this too
const MIN_INTERVAL_SECS: u64 = 10;

/// Wait between attempts when the settings row cannot be read
const SETTINGS_RETRY_SECS: u64 = 30;

/// Run the scheduler loop until cancelled
pub async fn run_scheduler(
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    shutdown: CancellationToken,
) {
    loop {
        let setting = match store.get_setting().await {
            Ok(setting) => setting,
            Err(e) => {
                tracing::warn!(error = %e, "Scheduler failed to load settings");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(SETTINGS_RETRY_SECS)) => continue,
                }
            }
        };

        let interval = (setting.polling_interval_sec.max(0) as u64).max(MIN_INTERVAL_SECS);

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
        }

        let job = match PipelineJob::new(
            JobKind::PollComments,
            &PollCommentsPayload {
                note_target: setting.note_target.clone(),
            },
        ) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build poll job");
                continue;
            }
        };

        if let Err(e) = queue.enqueue(&job).await {
            tracing::error!(error = %e, "Failed to enqueue poll job");
        } else {
            tracing::debug!(note_target = %setting.note_target, "Scheduled poll");
        }
    }

    tracing::info!("Scheduler stopped");
}
