use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{BotError, Result};
use crate::shared::config::ModelConfig;
use crate::shared::models::ConversationMessage;

/// A chat-completion model: system prompt plus history in, one reply out.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        system_prompt: Option<&str>,
        messages: &[ConversationMessage],
    ) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatRequestMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    auth_header: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| BotError::Model(format!("Failed to create client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header: format!("Bearer {}", config.api_key.trim()),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(
        &self,
        system_prompt: Option<&str>,
        messages: &[ConversationMessage],
    ) -> Result<String> {
        let mut chat_messages: Vec<ChatRequestMessage> = Vec::new();
        if let Some(sp) = system_prompt {
            chat_messages.push(ChatRequestMessage {
                role: "system",
                content: sp,
            });
        }
        for message in messages {
            if message.content.trim().is_empty() {
                continue;
            }
            chat_messages.push(ChatRequestMessage {
                role: message.role.as_str(),
                content: message.content.trim(),
            });
        }

        if chat_messages.is_empty() {
            return Err(BotError::Model("No messages provided".to_string()));
        }

        let req = ChatRequest {
            model: &self.model,
            messages: chat_messages,
            temperature: 0.2,
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!("Requesting completion from {}", url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", &self.auth_header)
            .json(&req)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read response>".to_string());
            return Err(BotError::Model(format!(
                "Chat completion error ({}): {}",
                status, text
            )));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| BotError::Model(format!("Failed to parse completion: {}", e)))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}
