//! Data models matching the PostgreSQL schema
//!
//! Status and type columns are stored as TEXT; typed enums with
//! `as_str`/`FromStr` conversions live next to the row structs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Connector backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorMode {
    Mock,
    Bridge,
}

impl ConnectorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorMode::Mock => "mock",
            ConnectorMode::Bridge => "bridge",
        }
    }
}

impl FromStr for ConnectorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(ConnectorMode::Mock),
            "bridge" => Ok(ConnectorMode::Bridge),
            _ => Err(format!("Invalid connector mode: {}", s)),
        }
    }
}

/// Pipeline task status
///
/// Legal transitions form a DAG: EXTRACTED → SUBMITTED → SUCCEEDED →
/// EMAILED, with any non-terminal state allowed to fail. PENDING is
/// reserved for legacy partial inserts and is never produced by the
/// current pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Extracted,
    Submitted,
    Running,
    Succeeded,
    Emailed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Extracted => "EXTRACTED",
            TaskStatus::Submitted => "SUBMITTED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Emailed => "EMAILED",
            TaskStatus::Failed => "FAILED",
        }
    }

    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Emailed | TaskStatus::Failed)
    }

    /// Whether `next` is reachable from this status in one step
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == TaskStatus::Failed {
            return true;
        }
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Extracted)
                | (TaskStatus::Extracted, TaskStatus::Submitted)
                | (TaskStatus::Submitted, TaskStatus::Running)
                | (TaskStatus::Submitted, TaskStatus::Succeeded)
                | (TaskStatus::Running, TaskStatus::Succeeded)
                | (TaskStatus::Succeeded, TaskStatus::Emailed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(TaskStatus::Pending),
            "EXTRACTED" => Ok(TaskStatus::Extracted),
            "SUBMITTED" => Ok(TaskStatus::Submitted),
            "RUNNING" => Ok(TaskStatus::Running),
            "SUCCEEDED" => Ok(TaskStatus::Succeeded),
            "EMAILED" => Ok(TaskStatus::Emailed),
            "FAILED" => Ok(TaskStatus::Failed),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

/// Kind of artifact a task generates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Image,
    Video,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Image => "image",
            RequestType::Video => "video",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RequestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "image" => Ok(RequestType::Image),
            "video" => Ok(RequestType::Video),
            _ => Err(format!("Invalid request type: {}", s)),
        }
    }
}

/// Outcome of a single delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "SENT",
            DeliveryStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SENT" => Ok(DeliveryStatus::Sent),
            "FAILED" => Ok(DeliveryStatus::Failed),
            _ => Err(format!("Invalid delivery status: {}", s)),
        }
    }
}

/// Singleton installation settings, read by the worker at each handler
/// invocation (never cached)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Setting {
    pub id: i64,
    pub connector_mode: String,
    pub bridge_server_url: Option<String>,
    #[serde(skip_serializing)]
    pub bridge_auth: Option<String>,
    pub note_target: String,
    pub polling_interval_sec: i32,
    pub llm_base_url: Option<String>,
    #[serde(skip_serializing)]
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
    pub llm_timeout_sec: i32,
    pub intent_threshold: f64,
    /// Ordered provider configuration list, JSON-encoded
    pub provider_json: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row per polled note target; mutated only by the poll handler
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Note {
    pub id: i64,
    pub note_target: String,
    /// Advances monotonically; never reset
    pub last_cursor: Option<String>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An ingested comment; immutable after insertion
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Comment {
    pub id: i64,
    pub note_target: String,
    /// External id when present, else a stable hash of the payload
    pub comment_uid: String,
    pub user_name: Option<String>,
    pub content: String,
    pub comment_created_at: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
}

/// Pipeline state for one accepted generation request; one per comment
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: i64,
    pub comment_id: i64,
    pub status: String,
    pub request_type: String,
    pub email: Option<String>,
    pub prompt: Option<String>,
    pub confidence: Option<f64>,
    pub provider_name: Option<String>,
    pub provider_job_id: Option<String>,
    pub result_url: Option<String>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Typed view of the status column
    pub fn task_status(&self) -> Option<TaskStatus> {
        self.status.parse().ok()
    }
}

/// A recorded outbound email attempt; append-only
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Delivery {
    pub id: i64,
    pub task_id: i64,
    pub email_to: String,
    pub status: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Structured diagnostic record; append-only
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLog {
    pub id: i64,
    pub level: String,
    pub event: String,
    #[sqlx(json)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// New audit log entry, before insertion
#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub level: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl NewAuditLog {
    pub fn error(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            level: "ERROR".to_string(),
            event: event.into(),
            payload,
        }
    }

    pub fn info(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            level: "INFO".to_string(),
            event: event.into(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Extracted,
            TaskStatus::Submitted,
            TaskStatus::Running,
            TaskStatus::Succeeded,
            TaskStatus::Emailed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_status_dag_happy_path() {
        assert!(TaskStatus::Extracted.can_transition_to(TaskStatus::Submitted));
        assert!(TaskStatus::Submitted.can_transition_to(TaskStatus::Succeeded));
        assert!(TaskStatus::Succeeded.can_transition_to(TaskStatus::Emailed));
    }

    #[test]
    fn test_status_dag_rejects_skips_and_backwards() {
        assert!(!TaskStatus::Extracted.can_transition_to(TaskStatus::Succeeded));
        assert!(!TaskStatus::Succeeded.can_transition_to(TaskStatus::Submitted));
        assert!(!TaskStatus::Emailed.can_transition_to(TaskStatus::Succeeded));
    }

    #[test]
    fn test_any_non_terminal_can_fail() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Extracted,
            TaskStatus::Submitted,
            TaskStatus::Running,
            TaskStatus::Succeeded,
        ] {
            assert!(status.can_transition_to(TaskStatus::Failed));
        }
    }

    #[test]
    fn test_terminal_states_are_frozen() {
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Extracted));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Emailed.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn test_request_type_parsing() {
        assert_eq!("image".parse::<RequestType>().unwrap(), RequestType::Image);
        assert_eq!("VIDEO".parse::<RequestType>().unwrap(), RequestType::Video);
        assert!("audio".parse::<RequestType>().is_err());
    }

    #[test]
    fn test_connector_mode_parsing() {
        assert_eq!("mock".parse::<ConnectorMode>().unwrap(), ConnectorMode::Mock);
        assert_eq!("bridge".parse::<ConnectorMode>().unwrap(), ConnectorMode::Bridge);
        assert!("stream".parse::<ConnectorMode>().is_err());
    }
}
