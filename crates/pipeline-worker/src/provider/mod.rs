//! Generation provider abstraction
//!
//! Every backend exposes the same two calls: submit a unified generation
//! request and poll a job's status. Providers are registered in a
//! name-keyed map built from the configured entries at startup; the
//! registry is read-only afterwards.

pub mod http;
pub mod mapper;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use shared::models::RequestType;

use crate::error::{WorkerError, WorkerResult};
use crate::storage::ObjectStore;

pub use http::HttpProvider;
pub use mapper::RequestMapper;
pub use mock::MockProvider;

/// Provider-side job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            _ => Err(format!("Invalid job state: {}", s)),
        }
    }
}

/// Unified generation request sent to any provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenRequest {
    pub request_id: String,
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl GenRequest {
    /// Minimal request carrying only the task identity, type and prompt
    pub fn new(request_id: impl Into<String>, request_type: RequestType, prompt: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            request_type,
            prompt: prompt.into(),
            negative_prompt: None,
            style: None,
            width: None,
            height: None,
            duration_sec: None,
            seed: None,
            extra: None,
        }
    }
}

/// Successful submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub provider_job_id: String,
}

/// Point-in-time job status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    #[serde(default)]
    pub progress: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A named generation backend
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&self, request: &GenRequest) -> WorkerResult<SubmitOutcome>;

    async fn status(&self, job_id: &str) -> WorkerResult<JobStatus>;
}

/// One configured provider entry from `Setting.provider_json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_name: String,
    /// "mock" selects the built-in simulator; anything else is HTTP
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub submit_path: String,
    /// Status GET path with an `{id}` placeholder
    #[serde(default)]
    pub status_path_template: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// JSON template; `$.`-prefixed strings reference request fields
    #[serde(default)]
    pub request_mapping: serde_json::Value,
}

/// Parse the ordered provider list out of the settings row
pub fn parse_provider_configs(provider_json: &str) -> WorkerResult<Vec<ProviderConfig>> {
    serde_json::from_str(provider_json)
        .map_err(|e| WorkerError::invalid_state(format!("invalid provider_json: {}", e)))
}

/// Name-keyed provider registry, populated at startup
pub type ProviderRegistry = HashMap<String, Arc<dyn Provider>>;

/// Build the registry from configured entries
pub fn build_registry(
    configs: &[ProviderConfig],
    storage: Arc<dyn ObjectStore>,
) -> ProviderRegistry {
    let mut registry: ProviderRegistry = HashMap::new();

    for config in configs {
        let provider: Arc<dyn Provider> = if config.kind == "mock" || config.provider_name == "mock"
        {
            Arc::new(MockProvider::new(&config.provider_name, storage.clone()))
        } else {
            Arc::new(HttpProvider::new(config.clone()))
        };
        registry.insert(config.provider_name.clone(), provider);
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryObjectStore;

    #[test]
    fn test_job_state_parses_lowercased() {
        assert_eq!("SUCCEEDED".parse::<JobState>().unwrap(), JobState::Succeeded);
        assert_eq!("pending".parse::<JobState>().unwrap(), JobState::Pending);
        assert!("done".parse::<JobState>().is_err());
    }

    #[test]
    fn test_gen_request_serialization_omits_unset_fields() {
        let request = GenRequest::new("task_1", RequestType::Image, "一张猫咪");
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["request_id"], "task_1");
        assert_eq!(value["type"], "image");
        assert_eq!(value["prompt"], "一张猫咪");
        assert!(value.get("negative_prompt").is_none());
        assert!(value.get("seed").is_none());
    }

    #[test]
    fn test_parse_provider_configs() {
        let json = r#"[
            {"provider_name": "mock", "type": "mock"},
            {"provider_name": "acme", "type": "http", "base_url": "https://acme.example",
             "api_key": "k", "submit_path": "/v1/generate", "status_path_template": "/v1/jobs/{id}"}
        ]"#;

        let configs = parse_provider_configs(json).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].provider_name, "mock");
        assert_eq!(configs[1].status_path_template, "/v1/jobs/{id}");

        assert!(parse_provider_configs("not json").is_err());
    }

    #[test]
    fn test_build_registry_selects_implementations() {
        let storage = Arc::new(InMemoryObjectStore::default());
        let configs = parse_provider_configs(
            r#"[
                {"provider_name": "mock", "type": "mock"},
                {"provider_name": "acme", "type": "http", "base_url": "https://acme.example"}
            ]"#,
        )
        .unwrap();

        let registry = build_registry(&configs, storage);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("mock").unwrap().name(), "mock");
        assert_eq!(registry.get("acme").unwrap().name(), "acme");
        assert!(!registry.contains_key("missing"));
    }
}
