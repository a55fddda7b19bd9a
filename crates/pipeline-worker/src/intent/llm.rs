//! LLM chat-completions client
//!
//! Minimal OpenAI-compatible surface: one system prompt, one user prompt,
//! temperature 0, returns the first choice's content.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Prompt-to-content client abstraction
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one completion and return the assistant message content
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> WorkerResult<String>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    error: Option<ChatError>,
}

/// OpenAI-compatible HTTP client
pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpLlmClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> WorkerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WorkerError::llm(format!("failed to build LLM client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> WorkerResult<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| WorkerError::llm(format!("LLM request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::llm(format!(
                "LLM API returned status {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::llm(format!("invalid LLM response: {}", e)))?;

        if let Some(error) = parsed.error {
            return Err(WorkerError::llm(format!("LLM API error: {}", error.message)));
        }

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| WorkerError::llm("no choices in LLM response"))
    }
}

/// Scripted client for tests: always answers with the configured content
pub struct StaticResponseLlm {
    content: std::sync::Mutex<String>,
    fail: std::sync::atomic::AtomicBool,
}

impl StaticResponseLlm {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: std::sync::Mutex::new(content.into()),
            fail: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_content(&self, content: impl Into<String>) {
        *self.content.lock().unwrap() = content.into();
    }

    /// Make subsequent calls fail at the transport level
    pub fn fail_calls(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmClient for StaticResponseLlm {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> WorkerResult<String> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(WorkerError::llm("simulated transport failure"));
        }
        Ok(self.content.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_response_parsing() {
        let json = r#"{
            "choices": [{"message": {"role": "assistant", "content": "{\"has_request\": true}"}}]
        }"#;
        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(parsed.choices[0].message.content, "{\"has_request\": true}");
        assert!(parsed.error.is_none());
    }

    #[test]
    fn test_chat_response_error_field() {
        let json = r#"{"error": {"message": "model overloaded"}}"#;
        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.choices.is_empty());
        assert_eq!(parsed.error.unwrap().message, "model overloaded");
    }
}
