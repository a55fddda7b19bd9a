//! Mock generation provider
//!
//! Fabricates jobs whose progress advances deterministically on each
//! status poll: pending on submit, then running at 20/40/60/80, then a
//! placeholder artifact is uploaded and the job succeeds with its
//! presigned URL. Stuck and failing variants exist for exercising the
//! status-poll termination and failure paths.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{WorkerError, WorkerResult};
use crate::storage::ObjectStore;

use super::{GenRequest, JobState, JobStatus, Provider, SubmitOutcome};

/// Progress values reported while a mock job is running
const PROGRESS_STEPS: [i32; 4] = [20, 40, 60, 80];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockBehavior {
    /// Run through the progress steps, then succeed
    Succeed,
    /// Report `running` forever
    StuckRunning,
    /// Report `failed` on the first poll
    Fail,
}

struct MockJob {
    request: GenRequest,
    polls: u32,
}

pub struct MockProvider {
    name: String,
    storage: Arc<dyn ObjectStore>,
    jobs: DashMap<String, MockJob>,
    counter: AtomicU64,
    behavior: MockBehavior,
}

impl MockProvider {
    pub fn new(name: impl Into<String>, storage: Arc<dyn ObjectStore>) -> Self {
        Self {
            name: name.into(),
            storage,
            jobs: DashMap::new(),
            counter: AtomicU64::new(0),
            behavior: MockBehavior::Succeed,
        }
    }

    /// A provider whose jobs never leave `running`
    pub fn stuck(name: impl Into<String>, storage: Arc<dyn ObjectStore>) -> Self {
        Self {
            behavior: MockBehavior::StuckRunning,
            ..Self::new(name, storage)
        }
    }

    /// A provider whose jobs fail immediately
    pub fn failing(name: impl Into<String>, storage: Arc<dyn ObjectStore>) -> Self {
        Self {
            behavior: MockBehavior::Fail,
            ..Self::new(name, storage)
        }
    }

    async fn generate_result(&self, job_id: &str, request: &GenRequest) -> WorkerResult<String> {
        let key = format!("mock/{}/{}", request.request_type, job_id);
        let content = format!(
            "Mock generated {} for request: {}\nPrompt: {}",
            request.request_type, request.request_id, request.prompt
        );

        self.storage
            .upload(&key, content.into_bytes(), "text/plain")
            .await
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, request: &GenRequest) -> WorkerResult<SubmitOutcome> {
        let sequence = self.counter.fetch_add(1, Ordering::SeqCst);
        let job_id = format!("mock_job_{}_{}", sequence, request.request_id);

        self.jobs.insert(
            job_id.clone(),
            MockJob {
                request: request.clone(),
                polls: 0,
            },
        );

        Ok(SubmitOutcome {
            provider_job_id: job_id,
        })
    }

    async fn status(&self, job_id: &str) -> WorkerResult<JobStatus> {
        let (polls, request) = {
            let mut job = self
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| WorkerError::provider(format!("job not found: {}", job_id)))?;
            job.polls += 1;
            (job.polls, job.request.clone())
        };

        match self.behavior {
            MockBehavior::StuckRunning => Ok(JobStatus {
                state: JobState::Running,
                progress: 50,
                result_url: None,
                error: None,
            }),
            MockBehavior::Fail => Ok(JobStatus {
                state: JobState::Failed,
                progress: 0,
                result_url: None,
                error: Some("mock generation failed".to_string()),
            }),
            MockBehavior::Succeed => {
                let steps = PROGRESS_STEPS.len() as u32;
                if polls <= steps {
                    Ok(JobStatus {
                        state: JobState::Running,
                        progress: PROGRESS_STEPS[(polls - 1) as usize],
                        result_url: None,
                        error: None,
                    })
                } else {
                    let url = self.generate_result(job_id, &request).await?;
                    Ok(JobStatus {
                        state: JobState::Succeeded,
                        progress: 100,
                        result_url: Some(url),
                        error: None,
                    })
                }
            }
        }
    }
}
