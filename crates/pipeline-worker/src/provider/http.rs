//! HTTP generation provider
//!
//! Parameterized entirely by configuration: base URL, submit/status
//! paths, extra headers, optional bearer key, and the request mapping
//! template. Both calls expect HTTP 200 with the JSON shapes the mapper
//! understands.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{WorkerError, WorkerResult};

use super::{GenRequest, JobStatus, Provider, ProviderConfig, RequestMapper, SubmitOutcome};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    mapper: RequestMapper,
}

impl HttpProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to build provider HTTP client, using defaults");
                reqwest::Client::new()
            });
        let mapper = RequestMapper::new(config.request_mapping.clone());

        Self {
            config,
            client,
            mapper,
        }
    }

    fn apply_headers(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (key, value) in &self.config.headers {
            builder = builder.header(key, value);
        }
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }
        builder
    }

    async fn read_ok_body(response: reqwest::Response) -> WorkerResult<Vec<u8>> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| WorkerError::provider(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(WorkerError::provider(format!(
                "provider returned status {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&body)
            )));
        }

        Ok(body.to_vec())
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.config.provider_name
    }

    async fn submit(&self, request: &GenRequest) -> WorkerResult<SubmitOutcome> {
        let body = self.mapper.map_request(request)?;
        let url = format!("{}{}", self.config.base_url, self.config.submit_path);

        let response = self
            .apply_headers(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| WorkerError::provider(format!("submit request failed: {}", e)))?;

        let bytes = Self::read_ok_body(response).await?;
        let provider_job_id = self.mapper.extract_job_id(&bytes)?;

        tracing::debug!(
            provider = %self.config.provider_name,
            request_id = %request.request_id,
            provider_job_id = %provider_job_id,
            "Submitted generation job"
        );

        Ok(SubmitOutcome { provider_job_id })
    }

    async fn status(&self, job_id: &str) -> WorkerResult<JobStatus> {
        let path = self.config.status_path_template.replace("{id}", job_id);
        let url = format!("{}{}", self.config.base_url, path);

        let response = self
            .apply_headers(self.client.get(&url))
            .send()
            .await
            .map_err(|e| WorkerError::provider(format!("status request failed: {}", e)))?;

        let bytes = Self::read_ok_body(response).await?;
        let (state, progress, result_url) = self.mapper.extract_status(&bytes)?;

        Ok(JobStatus {
            state,
            progress,
            result_url,
            error: None,
        })
    }
}
