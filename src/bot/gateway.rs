use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::cards::{Card, CardAction, OutgoingMessage};
use super::error::{BotError, Result};

/// Outbound side of the chat platform.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Posts to a channel (or a user id, which opens a DM), optionally in a thread.
    async fn send(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        message: &OutgoingMessage,
    ) -> Result<()>;

    /// Posts a message only `user` can see.
    async fn send_ephemeral(&self, channel: &str, user: &str, text: &str) -> Result<()>;
}

const SLACK_API_BASE: &str = "https://slack.com/api";
const SLACK_TEXT_MAX_CHARS: usize = 35_000;
const SLACK_ACTIONS_PER_BLOCK: usize = 25;
const SLACK_BUTTON_LABEL_MAX_CHARS: usize = 75;

#[derive(Debug, Deserialize)]
struct SlackApiResponse<T> {
    ok: bool,
    error: Option<String>,
    #[serde(flatten)]
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    user_id: String,
}

/// Slack Web API client.
#[derive(Debug, Clone)]
pub struct SlackGateway {
    http: reqwest::Client,
    bot_token: String,
    api_base: String,
}

impl SlackGateway {
    pub fn new(http: reqwest::Client, bot_token: String) -> Self {
        Self {
            http,
            bot_token,
            api_base: SLACK_API_BASE.to_string(),
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.bot_token))
            .map_err(|e| BotError::Delivery(format!("invalid bot token header: {}", e)))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        Ok(headers)
    }

    async fn call<B: Serialize + ?Sized, T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<Option<T>> {
        let resp: SlackApiResponse<T> = self
            .http
            .post(format!("{}/{}", self.api_base, method))
            .headers(self.headers()?)
            .json(body)
            .send()
            .await
            .map_err(|e| BotError::Delivery(format!("slack {} request: {}", method, e)))?
            .json()
            .await
            .map_err(|e| BotError::Delivery(format!("slack {} decode: {}", method, e)))?;

        if !resp.ok {
            return Err(BotError::Delivery(format!(
                "slack {} failed: {}",
                method,
                resp.error.unwrap_or_else(|| "unknown_error".to_string())
            )));
        }
        Ok(resp.data)
    }

    /// Resolves the bot's own user id.
    pub async fn auth_test(&self) -> Result<String> {
        let data: Option<AuthTestResponse> = self.call("auth.test", &json!({})).await?;
        data.map(|d| d.user_id)
            .ok_or_else(|| BotError::Delivery("slack auth.test returned no user_id".to_string()))
    }
}

fn truncate(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return "(empty)".to_string();
    }
    text.chars().take(SLACK_TEXT_MAX_CHARS).collect()
}

fn button_label(label: &str) -> String {
    if label.chars().count() <= SLACK_BUTTON_LABEL_MAX_CHARS {
        return label.to_string();
    }
    let mut capped: String = label.chars().take(SLACK_BUTTON_LABEL_MAX_CHARS - 1).collect();
    capped.push('…');
    capped
}

fn push_section(blocks: &mut Vec<serde_json::Value>, text: &str, actions: &[CardAction]) {
    blocks.push(json!({
        "type": "section",
        "text": { "type": "mrkdwn", "text": truncate(text) }
    }));

    for chunk in actions.chunks(SLACK_ACTIONS_PER_BLOCK) {
        let elements: Vec<serde_json::Value> = chunk
            .iter()
            .map(|action| {
                let mut button = json!({
                    "type": "button",
                    "text": { "type": "plain_text", "text": button_label(&action.label), "emoji": true },
                    "action_id": action.action_id,
                    "value": action.value,
                });
                if let Some(style) = action.style {
                    button["style"] = json!(style);
                }
                button
            })
            .collect();
        blocks.push(json!({ "type": "actions", "elements": elements }));
    }
}

/// Block Kit rendering: each section as mrkdwn followed by its own actions block.
pub fn card_blocks(card: &Card) -> serde_json::Value {
    let mut blocks = Vec::new();
    if card.sections.is_empty() {
        push_section(&mut blocks, &card.text, &card.actions);
    } else {
        for section in &card.sections {
            push_section(&mut blocks, &section.text, &section.actions);
        }
    }
    serde_json::Value::Array(blocks)
}

#[async_trait]
impl MessagingGateway for SlackGateway {
    async fn send(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        message: &OutgoingMessage,
    ) -> Result<()> {
        #[derive(Serialize)]
        struct Req<'a> {
            channel: &'a str,
            text: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            thread_ts: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            blocks: Option<serde_json::Value>,
        }

        let blocks = match message {
            OutgoingMessage::Text(_) => None,
            OutgoingMessage::Card(card) => Some(card_blocks(card)),
        };

        let _: Option<serde_json::Value> = self
            .call(
                "chat.postMessage",
                &Req {
                    channel,
                    text: truncate(message.fallback_text()),
                    thread_ts,
                    blocks,
                },
            )
            .await?;
        debug!("Posted message to {}", channel);
        Ok(())
    }

    async fn send_ephemeral(&self, channel: &str, user: &str, text: &str) -> Result<()> {
        let _: Option<serde_json::Value> = self
            .call(
                "chat.postEphemeral",
                &json!({ "channel": channel, "user": user, "text": truncate(text) }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::cards::{task_list_message, ButtonStyle, ListScope};

    #[test]
    fn test_card_blocks_render_buttons() {
        let card = Card {
            text: "hello".to_string(),
            actions: vec![
                CardAction {
                    action_id: "task_complete".to_string(),
                    label: "Complete".to_string(),
                    value: "t-1".to_string(),
                    style: Some(ButtonStyle::Primary),
                },
                CardAction {
                    action_id: "task_delay_15m".to_string(),
                    label: "+15".to_string(),
                    value: "t-1".to_string(),
                    style: None,
                },
            ],
            sections: Vec::new(),
        };

        let blocks = card_blocks(&card);
        assert_eq!(blocks[0]["text"]["text"], "hello");
        let elements = blocks[1]["elements"].as_array().unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0]["style"], "primary");
        assert_eq!(elements[0]["value"], "t-1");
        assert!(elements[1].get("style").is_none());
    }

    #[test]
    fn test_task_list_renders_one_actions_block_per_task() {
        let now = chrono::Utc::now();
        let task = |id: &str, title: &str| crate::shared::models::Task {
            id: id.to_string(),
            title: title.to_string(),
            due_at: now,
            assignee: "UAAA111".to_string(),
            assignees: vec![],
            created_by: "UAAA111".to_string(),
            channel_id: "C1".to_string(),
            completed: false,
            not_completed_reason: None,
            deadline_reminder_sent_at: None,
            created_at: now,
            updated_at: now,
        };
        let long_title = "x".repeat(120);
        let message = task_list_message(
            &[task("t-1", "Ship the report"), task("t-2", &long_title)],
            ListScope::Pending,
        );
        let OutgoingMessage::Card(card) = message else {
            panic!("expected a card");
        };

        let blocks = card_blocks(&card);
        let action_blocks: Vec<&serde_json::Value> = blocks
            .as_array()
            .unwrap()
            .iter()
            .filter(|b| b["type"] == "actions")
            .collect();
        assert_eq!(action_blocks.len(), 2);
        for block in &action_blocks {
            let ids: Vec<&str> = block["elements"]
                .as_array()
                .unwrap()
                .iter()
                .map(|e| e["action_id"].as_str().unwrap())
                .collect();
            let mut unique = ids.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(ids.len(), unique.len());
        }

        let labels: Vec<&str> = action_blocks[1]["elements"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["text"]["text"].as_str().unwrap())
            .collect();
        assert!(labels
            .iter()
            .all(|l| l.chars().count() <= SLACK_BUTTON_LABEL_MAX_CHARS));
        assert!(labels[0].ends_with('…'));
        assert_eq!(action_blocks[0]["elements"][0]["value"], "t-1");
    }

    #[test]
    fn test_text_is_never_empty() {
        assert_eq!(truncate("   "), "(empty)");
        assert_eq!(truncate(" hi "), "hi");
    }
}
