//! Request/response field mapper for HTTP providers
//!
//! Outbound: a JSON template where string values starting with `$.` are
//! path references into the unified request (by its serialized field
//! names, case-sensitive); scalars pass through, arrays and objects map
//! element-wise. An empty template serializes the request as-is.
//!
//! Inbound: job id from `$.data.id`, status from `$.status` (lowercased),
//! progress from `$.progress` (defaulted to 0), result url from
//! `$.output.url`. Optional fields may be missing.

use serde_json::Value;

use crate::error::{WorkerError, WorkerResult};

use super::{GenRequest, JobState};

/// Walk a `$.a.b.c` path through nested JSON objects
fn extract_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.trim_start_matches("$.").split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Maps unified requests onto a provider's wire format
pub struct RequestMapper {
    request_mapping: Value,
}

impl RequestMapper {
    pub fn new(request_mapping: Value) -> Self {
        Self { request_mapping }
    }

    /// Render the provider request body for a unified request
    pub fn map_request(&self, request: &GenRequest) -> WorkerResult<Value> {
        let request_value = serde_json::to_value(request)?;

        let mapping = match self.request_mapping.as_object() {
            Some(mapping) if !mapping.is_empty() => mapping,
            // Empty mapping: the unified request is the wire format
            _ => return Ok(request_value),
        };

        let mut result = serde_json::Map::new();
        for (key, template) in mapping {
            result.insert(key.clone(), Self::map_value(template, &request_value)?);
        }
        Ok(Value::Object(result))
    }

    fn map_value(template: &Value, request: &Value) -> WorkerResult<Value> {
        match template {
            Value::String(s) if s.starts_with("$.") => extract_path(request, s)
                .cloned()
                .ok_or_else(|| WorkerError::invalid_state(format!("field not found: {}", s))),
            Value::Object(map) => {
                let mut result = serde_json::Map::new();
                for (key, value) in map {
                    result.insert(key.clone(), Self::map_value(value, request)?);
                }
                Ok(Value::Object(result))
            }
            Value::Array(items) => {
                let mut result = Vec::with_capacity(items.len());
                for item in items {
                    result.push(Self::map_value(item, request)?);
                }
                Ok(Value::Array(result))
            }
            scalar => Ok(scalar.clone()),
        }
    }

    /// Pull the provider job id out of a submit response
    pub fn extract_job_id(&self, body: &[u8]) -> WorkerResult<String> {
        let response: Value = serde_json::from_slice(body)?;

        let job_id = extract_path(&response, "$.data.id")
            .ok_or_else(|| WorkerError::provider("job id not found at $.data.id"))?;

        job_id
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WorkerError::provider("job id is not a string"))
    }

    /// Pull `(state, progress, result_url)` out of a status response
    pub fn extract_status(
        &self,
        body: &[u8],
    ) -> WorkerResult<(JobState, i32, Option<String>)> {
        let response: Value = serde_json::from_slice(body)?;

        let status_raw = extract_path(&response, "$.status")
            .and_then(Value::as_str)
            .ok_or_else(|| WorkerError::provider("status not found at $.status"))?;

        let state: JobState = status_raw
            .parse()
            .map_err(|e: String| WorkerError::provider(e))?;

        let progress = extract_path(&response, "$.progress")
            .and_then(Value::as_f64)
            .map(|p| p as i32)
            .unwrap_or(0);

        let result_url = extract_path(&response, "$.output.url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_string);

        Ok((state, progress, result_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::models::RequestType;

    fn request() -> GenRequest {
        GenRequest::new("task_42", RequestType::Image, "一张赛博朋克风格的猫咪")
    }

    #[test]
    fn test_empty_mapping_passes_request_through() {
        let mapper = RequestMapper::new(json!({}));
        let body = mapper.map_request(&request()).unwrap();

        assert_eq!(body["request_id"], "task_42");
        assert_eq!(body["type"], "image");
        assert_eq!(body["prompt"], "一张赛博朋克风格的猫咪");
    }

    #[test]
    fn test_null_mapping_behaves_like_empty() {
        let mapper = RequestMapper::new(Value::Null);
        let body = mapper.map_request(&request()).unwrap();
        assert_eq!(body["request_id"], "task_42");
    }

    #[test]
    fn test_mapping_resolves_field_references() {
        let mapper = RequestMapper::new(json!({
            "input": {
                "text": "$.prompt",
                "task": "$.request_id"
            },
            "model": "sd-xl",
            "steps": 30,
            "tags": ["$.type", "generated"]
        }));

        let body = mapper.map_request(&request()).unwrap();

        assert_eq!(body["input"]["text"], "一张赛博朋克风格的猫咪");
        assert_eq!(body["input"]["task"], "task_42");
        assert_eq!(body["model"], "sd-xl");
        assert_eq!(body["steps"], 30);
        assert_eq!(body["tags"], json!(["image", "generated"]));
    }

    #[test]
    fn test_mapping_unknown_field_errors() {
        let mapper = RequestMapper::new(json!({"text": "$.Prompt"}));
        // References are case-sensitive against the serialized names
        let err = mapper.map_request(&request()).unwrap_err();
        assert!(err.to_string().contains("field not found"));
    }

    #[test]
    fn test_extract_job_id() {
        let mapper = RequestMapper::new(json!({}));
        let body = br#"{"code": 0, "data": {"id": "job-789"}}"#;
        assert_eq!(mapper.extract_job_id(body).unwrap(), "job-789");

        let missing = br#"{"data": {}}"#;
        assert!(mapper.extract_job_id(missing).is_err());

        let not_string = br#"{"data": {"id": 789}}"#;
        assert!(mapper.extract_job_id(not_string).is_err());
    }

    #[test]
    fn test_extract_status_full_response() {
        let mapper = RequestMapper::new(json!({}));
        let body = br#"{"status": "SUCCEEDED", "progress": 100, "output": {"url": "https://cdn.example/a.png"}}"#;

        let (state, progress, url) = mapper.extract_status(body).unwrap();
        assert_eq!(state, JobState::Succeeded);
        assert_eq!(progress, 100);
        assert_eq!(url.as_deref(), Some("https://cdn.example/a.png"));
    }

    #[test]
    fn test_extract_status_tolerates_missing_optionals() {
        let mapper = RequestMapper::new(json!({}));
        let body = br#"{"status": "running"}"#;

        let (state, progress, url) = mapper.extract_status(body).unwrap();
        assert_eq!(state, JobState::Running);
        assert_eq!(progress, 0);
        assert!(url.is_none());
    }

    #[test]
    fn test_extract_status_rejects_unknown_state() {
        let mapper = RequestMapper::new(json!({}));
        let body = br#"{"status": "exploded"}"#;
        assert!(mapper.extract_status(body).is_err());
    }
}
