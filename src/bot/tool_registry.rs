use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::cards::OutgoingMessage;
use super::error::Result;
use super::gateway::MessagingGateway;
use crate::shared::store::TaskStore;

/// Everything a tool may touch while handling one request.
#[derive(Clone)]
pub struct ToolContext {
    pub gateway: Arc<dyn MessagingGateway>,
    pub store: Arc<dyn TaskStore>,
    pub channel_id: String,
    pub user_id: String,
    pub raw_text: String,
    pub thread_ts: Option<String>,
}

impl ToolContext {
    /// Posts into the conversation the request came from.
    pub async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        self.gateway
            .send(&self.channel_id, self.thread_ts.as_deref(), message)
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub status: ToolStatus,
    pub message: Option<String>,
    pub data: Option<serde_json::Value>,
}

impl ToolOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Success,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Core trait that all tools must implement
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses in `[Name] {...}`
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Argument JSON schema
    fn parameters(&self) -> serde_json::Value;

    /// One canonical payload shown to the model
    fn input_example(&self) -> &str;

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutcome>;
}

/// Name-keyed tool table. Listing is sorted by name so prompts are stable.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by name
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        info!("Registering tool: {}", name);
        self.tools.write().await.insert(name, tool);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.read().await.values().cloned().collect()
    }
}
