//! Pipeline job definitions
//!
//! Jobs are the envelopes the worker consumes from Redis. Each job names a
//! handler (its kind), carries a JSON payload, and accounts its queue
//! redelivery attempts so backoff state survives a stateless worker fleet.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Sorted set holding delayed jobs (score = ready-at millis)
pub const SCHEDULED_SET: &str = "pipeline:scheduled";

/// Dead letter list for jobs that exhausted their redelivery attempts
pub const DEAD_LETTER_QUEUE: &str = "pipeline:dead";

/// Named priority lanes with weighted dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Critical,
    Default,
    Low,
}

impl Lane {
    /// Redis list key backing this lane
    pub fn queue_key(&self) -> &'static str {
        match self {
            Lane::Critical => "pipeline:critical",
            Lane::Default => "pipeline:default",
            Lane::Low => "pipeline:low",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Critical => "critical",
            Lane::Default => "default",
            Lane::Low => "low",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Handler selector for a pipeline job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "poll:comments")]
    PollComments,
    #[serde(rename = "process:comment")]
    ProcessComment,
    #[serde(rename = "submit:job")]
    SubmitJob,
    #[serde(rename = "check:status")]
    CheckStatus,
    #[serde(rename = "send:email")]
    SendEmail,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::PollComments => "poll:comments",
            JobKind::ProcessComment => "process:comment",
            JobKind::SubmitJob => "submit:job",
            JobKind::CheckStatus => "check:status",
            JobKind::SendEmail => "send:email",
        }
    }

    /// The lane this kind of job is dispatched on
    pub fn lane(&self) -> Lane {
        match self {
            JobKind::PollComments | JobKind::SubmitJob | JobKind::SendEmail => Lane::Critical,
            JobKind::ProcessComment | JobKind::CheckStatus => Lane::Default,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "poll:comments" => Ok(JobKind::PollComments),
            "process:comment" => Ok(JobKind::ProcessComment),
            "submit:job" => Ok(JobKind::SubmitJob),
            "check:status" => Ok(JobKind::CheckStatus),
            "send:email" => Ok(JobKind::SendEmail),
            _ => Err(format!("Invalid job kind: {}", s)),
        }
    }
}

/// Job envelope consumed by the pipeline worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineJob {
    /// Unique job identifier
    pub id: String,
    /// Handler selector
    pub kind: JobKind,
    /// Handler-specific payload
    pub payload: serde_json::Value,
    /// Queue redelivery attempts already made for this job
    #[serde(default)]
    pub attempt: u32,
    /// When this job was first enqueued
    pub created_at: DateTime<Utc>,
}

impl PipelineJob {
    /// Create a new job with a typed payload
    pub fn new<P: Serialize>(kind: JobKind, payload: &P) -> serde_json::Result<Self> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            kind,
            payload: serde_json::to_value(payload)?,
            attempt: 0,
            created_at: Utc::now(),
        })
    }

    /// Deserialize the payload into the handler's input type
    pub fn parse_payload<P: DeserializeOwned>(&self) -> serde_json::Result<P> {
        serde_json::from_value(self.payload.clone())
    }

    /// The same job, accounted for one more redelivery
    pub fn next_attempt(&self) -> Self {
        let mut job = self.clone();
        job.attempt += 1;
        job
    }

    /// The lane this job is dispatched on
    pub fn lane(&self) -> Lane {
        self.kind.lane()
    }
}

/// Payload for `poll:comments`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollCommentsPayload {
    pub note_target: String,
}

/// Payload for `process:comment`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessCommentPayload {
    pub comment_id: i64,
    pub comment_uid: String,
    pub content: String,
    pub note_target: String,
}

/// Payload for `submit:job`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobPayload {
    pub task_id: i64,
    pub request_type: String,
    pub prompt: String,
}

/// Payload for `check:status`
///
/// Carries the status-poll retry counter so the backoff schedule survives
/// worker restarts and queue redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckStatusPayload {
    pub task_id: i64,
    pub provider_job_id: String,
    pub provider_name: String,
    #[serde(default)]
    pub retry_count: u32,
}

/// Payload for `send:email`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendEmailPayload {
    pub task_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_round_trip() {
        let job = PipelineJob::new(
            JobKind::ProcessComment,
            &ProcessCommentPayload {
                comment_id: 7,
                comment_uid: "uid-7".to_string(),
                content: "帮我画一张猫咪 test@example.com".to_string(),
                note_target: "note-1".to_string(),
            },
        )
        .unwrap();

        let json = serde_json::to_string(&job).unwrap();
        let parsed: PipelineJob = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, job.id);
        assert_eq!(parsed.kind, JobKind::ProcessComment);
        assert_eq!(parsed.attempt, 0);

        let payload: ProcessCommentPayload = parsed.parse_payload().unwrap();
        assert_eq!(payload.comment_id, 7);
        assert_eq!(payload.comment_uid, "uid-7");
    }

    #[test]
    fn test_kind_names_are_canonical() {
        assert_eq!(JobKind::PollComments.as_str(), "poll:comments");
        assert_eq!(JobKind::CheckStatus.as_str(), "check:status");
        assert_eq!("send:email".parse::<JobKind>().unwrap(), JobKind::SendEmail);
        assert!("poll".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_lane_assignment() {
        assert_eq!(JobKind::PollComments.lane(), Lane::Critical);
        assert_eq!(JobKind::SubmitJob.lane(), Lane::Critical);
        assert_eq!(JobKind::SendEmail.lane(), Lane::Critical);
        assert_eq!(JobKind::ProcessComment.lane(), Lane::Default);
        assert_eq!(JobKind::CheckStatus.lane(), Lane::Default);
    }

    #[test]
    fn test_next_attempt_increments() {
        let job = PipelineJob::new(JobKind::SendEmail, &SendEmailPayload { task_id: 1 }).unwrap();
        let retried = job.next_attempt();
        assert_eq!(retried.attempt, 1);
        assert_eq!(retried.id, job.id);
        assert_eq!(retried.next_attempt().attempt, 2);
    }

    #[test]
    fn test_check_status_retry_count_defaults_to_zero() {
        let payload: CheckStatusPayload = serde_json::from_str(
            r#"{"task_id": 3, "provider_job_id": "job-3", "provider_name": "mock"}"#,
        )
        .unwrap();
        assert_eq!(payload.retry_count, 0);
    }
}
