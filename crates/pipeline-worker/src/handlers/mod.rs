//! Pipeline handlers
//!
//! Five handlers advance a comment from observed to delivered:
//! `poll:comments` ingests new comments, `process:comment` runs the
//! intent gate, `submit:job` hands the request to a provider,
//! `check:status` polls the provider with capped exponential backoff,
//! and `send:email` delivers the presigned result link.
//!
//! Handlers reload their rows at entry and check the task status before
//! acting, so queue redelivery of any stage is safe.

pub mod check_status;
pub mod poll;
pub mod process;
pub mod send_email;
pub mod submit;

use sha2::{Digest, Sha256};
use std::sync::Arc;

use shared::jobs::{JobKind, PipelineJob};
use shared::models::{Task, TaskStatus};
use shared::Store;

use crate::connector::{Connector, SourceComment};
use crate::error::WorkerResult;
use crate::intent::IntentExtractor;
use crate::lock::PollLock;
use crate::mailer::Mailer;
use crate::provider::{ProviderConfig, ProviderRegistry};
use crate::queue::JobQueue;
use crate::rate_limiter::RecipientRateLimiter;

/// Globally unique comment identifier
///
/// The external id when present; otherwise the hex SHA-256 of the joined
/// payload, stable across re-polls of the same page.
pub fn comment_uid(comment: &SourceComment) -> String {
    if !comment.comment_id.is_empty() {
        return comment.comment_id.clone();
    }

    let unix_ts = comment
        .comment_created_at
        .map(|t| t.timestamp())
        .unwrap_or(0);
    let data = format!(
        "{}|{}|{}|{}",
        comment.comment_id, comment.user_name, comment.content, unix_ts
    );
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// The orchestration core: owns every seam the handlers touch
pub struct Pipeline {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    connector: Arc<dyn Connector>,
    intent: IntentExtractor,
    providers: ProviderRegistry,
    mailer: Arc<dyn Mailer>,
    lock: Arc<dyn PollLock>,
    rate_limiter: Arc<dyn RecipientRateLimiter>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        connector: Arc<dyn Connector>,
        intent: IntentExtractor,
        providers: ProviderRegistry,
        mailer: Arc<dyn Mailer>,
        lock: Arc<dyn PollLock>,
        rate_limiter: Arc<dyn RecipientRateLimiter>,
    ) -> Self {
        Self {
            store,
            queue,
            connector,
            intent,
            providers,
            mailer,
            lock,
            rate_limiter,
        }
    }

    /// Route a consumed job to its handler
    pub async fn dispatch(&self, job: &PipelineJob) -> WorkerResult<()> {
        match job.kind {
            JobKind::PollComments => self.handle_poll_comments(job.parse_payload()?).await,
            JobKind::ProcessComment => self.handle_process_comment(job.parse_payload()?).await,
            JobKind::SubmitJob => self.handle_submit_job(job.parse_payload()?).await,
            JobKind::CheckStatus => self.handle_check_status(job.parse_payload()?).await,
            JobKind::SendEmail => self.handle_send_email(job.parse_payload()?).await,
        }
    }

    /// Pick the provider for a new submission
    ///
    /// Always the first configured entry. The remaining entries are kept
    /// as configuration; a failover strategy can replace this selection
    /// without touching the task contract.
    fn select_provider<'a>(&self, configs: &'a [ProviderConfig]) -> Option<&'a ProviderConfig> {
        configs.first()
    }

    /// Record a permanent failure on a task
    ///
    /// A conflict here means a racing handler already moved the task to a
    /// terminal state, which is fine; anything else is logged and dropped
    /// because failing to record a failure must not mask the original one.
    async fn fail_task(&self, task: &mut Task, error: String) {
        task.status = TaskStatus::Failed.as_str().to_string();
        task.error = Some(error);
        match self.store.update_task(task).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {}
            Err(e) => {
                tracing::error!(task_id = task.id, error = %e, "Failed to record task failure");
            }
        }
    }
}
