//! Comment source abstraction
//!
//! A connector lists the comments of one note target, cursor-paginated.
//! Two backends: an in-memory mock with deterministic fixtures, and a
//! JSON-RPC bridge to a remote tool server.

pub mod bridge;
pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use shared::models::{ConnectorMode, Setting};

use crate::error::{WorkerError, WorkerResult};

pub use bridge::BridgeConnector;
pub use mock::MockConnector;

/// One comment as returned by the source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceComment {
    #[serde(default)]
    pub comment_id: String,
    #[serde(default)]
    pub user_name: String,
    pub content: String,
    #[serde(default)]
    pub comment_created_at: Option<DateTime<Utc>>,
}

/// One page of comments
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommentPage {
    #[serde(default)]
    pub comments: Vec<SourceComment>,
    #[serde(default)]
    pub next_cursor: String,
    #[serde(default)]
    pub has_more: bool,
}

/// Cursor-paginated comment listing
#[async_trait]
pub trait Connector: Send + Sync {
    /// List comments for a note target from `cursor` (empty on first run)
    async fn list_comments(&self, note_target: &str, cursor: &str) -> WorkerResult<CommentPage>;
}

/// Build the connector selected by the settings row
pub fn build_connector(setting: &Setting) -> WorkerResult<Arc<dyn Connector>> {
    let mode = ConnectorMode::from_str(&setting.connector_mode)
        .map_err(WorkerError::invalid_state)?;

    match mode {
        ConnectorMode::Mock => Ok(Arc::new(MockConnector::new())),
        ConnectorMode::Bridge => {
            let server_url = setting
                .bridge_server_url
                .as_deref()
                .filter(|url| !url.is_empty())
                .ok_or_else(|| {
                    WorkerError::invalid_state("bridge server URL is required for bridge mode")
                })?;
            Ok(Arc::new(BridgeConnector::new(
                server_url,
                setting.bridge_auth.clone(),
            )?))
        }
    }
}
