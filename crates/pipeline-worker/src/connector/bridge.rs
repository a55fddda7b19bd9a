//! JSON-RPC 2.0 bridge connector
//!
//! Talks to a remote tool server: every listing is one `tools/call`
//! invocation of `xhs_list_comments` with `{note_id_or_url, cursor?}`
//! arguments. The result payload is shaped exactly like [`CommentPage`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

use super::{CommentPage, Connector};

const LIST_COMMENTS_TOOL: &str = "xhs_list_comments";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: ToolCallParams<'a>,
}

#[derive(Debug, Serialize)]
struct ToolCallParams<'a> {
    name: &'a str,
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

pub struct BridgeConnector {
    client: reqwest::Client,
    server_url: String,
    auth: Option<String>,
}

impl BridgeConnector {
    pub fn new(server_url: impl Into<String>, auth: Option<String>) -> WorkerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WorkerError::connector(format!("failed to build bridge client: {}", e)))?;

        Ok(Self {
            client,
            server_url: server_url.into(),
            auth: auth.filter(|a| !a.is_empty()),
        })
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> WorkerResult<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "tools/call",
            params: ToolCallParams { name, arguments },
        };

        let mut builder = self.client.post(&self.server_url).json(&request);
        if let Some(auth) = &self.auth {
            builder = builder.header("Authorization", auth);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| WorkerError::connector(format!("bridge request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::connector(format!(
                "bridge server returned status {}: {}",
                status, body
            )));
        }

        let parsed: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::connector(format!("invalid bridge response: {}", e)))?;

        if let Some(error) = parsed.error {
            return Err(WorkerError::connector(format!(
                "bridge error {}: {}",
                error.code, error.message
            )));
        }

        parsed
            .result
            .ok_or_else(|| WorkerError::connector("bridge response missing result"))
    }
}

#[async_trait]
impl Connector for BridgeConnector {
    async fn list_comments(&self, note_target: &str, cursor: &str) -> WorkerResult<CommentPage> {
        let mut arguments = serde_json::Map::new();
        arguments.insert(
            "note_id_or_url".to_string(),
            Value::String(note_target.to_string()),
        );
        if !cursor.is_empty() {
            arguments.insert("cursor".to_string(), Value::String(cursor.to_string()));
        }

        let result = self
            .call_tool(LIST_COMMENTS_TOOL, Value::Object(arguments))
            .await?;

        serde_json::from_value(result)
            .map_err(|e| WorkerError::connector(format!("invalid comment page: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "tools/call",
            params: ToolCallParams {
                name: LIST_COMMENTS_TOOL,
                arguments: json!({"note_id_or_url": "note-1", "cursor": "c-5"}),
            },
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "tools/call");
        assert_eq!(value["params"]["name"], "xhs_list_comments");
        assert_eq!(value["params"]["arguments"]["note_id_or_url"], "note-1");
        assert_eq!(value["params"]["arguments"]["cursor"], "c-5");
    }

    #[test]
    fn test_response_result_parses_into_page() {
        let response: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "comments": [
                    {"comment_id": "c-1", "user_name": "u", "content": "帮我画一张猫咪 a@b.co"}
                ],
                "next_cursor": "c-1",
                "has_more": true
            }
        }))
        .unwrap();

        let page: CommentPage = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(page.comments.len(), 1);
        assert_eq!(page.comments[0].comment_id, "c-1");
        assert!(page.has_more);
    }

    #[test]
    fn test_response_error_detected() {
        let response: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32601, "message": "Method not found"}
        }))
        .unwrap();

        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
        assert!(response.result.is_none());
    }
}
