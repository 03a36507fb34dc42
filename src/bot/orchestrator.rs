//! Model-driven tool loop: prompt, one completion, then the embedded calls in order.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::cards::OutgoingMessage;
use super::error::{BotError, Result};
use super::llm::ChatModel;
use super::protocol::{extract_tool_calls, ParsedToolCall};
use super::tool_registry::{Tool, ToolContext, ToolOutcome, ToolRegistry, ToolStatus};
use crate::shared::models::ConversationMessage;

pub const EMPTY_REPLY: &str = "Noted.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolTrace {
    pub name: String,
    pub status: ToolStatus,
    pub message: Option<String>,
}

impl ToolTrace {
    fn error(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: ToolStatus::Error,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorOutput {
    pub final_reply: String,
    pub raw_response: String,
    pub tool_results: Vec<ToolTrace>,
}

impl OrchestratorOutput {
    pub fn failed(&self) -> impl Iterator<Item = &ToolTrace> {
        self.tool_results
            .iter()
            .filter(|t| t.status == ToolStatus::Error)
    }
}

pub fn build_system_prompt(
    tools: &[Arc<dyn Tool>],
    user_id: &str,
    channel_id: &str,
    now: DateTime<Utc>,
) -> String {
    let tools_description = if tools.is_empty() {
        "- (no tools registered yet)".to_string()
    } else {
        tools
            .iter()
            .map(|tool| {
                format!(
                    "- [{}]\n  Purpose: {}\n  Parameters (JSON schema): {}\n  JSON payload example: {}",
                    tool.name(),
                    tool.description(),
                    tool.parameters(),
                    tool.input_example()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    let current_time = now.to_rfc3339_opts(SecondsFormat::Millis, true);

    format!(
        r#"You are a proactive operations assistant that keeps the team's tasks on track. You read messages from teammates and decide what operational help they need. Keep responses concise, professional, and execution-focused.

You coordinate work by invoking tools. Only trigger a tool when it truly helps. You may trigger several tools in one reply.

Available tools:
{tools_description}

Tool usage rules:
1. Tools are ONLY triggered by outputting the exact token followed immediately by a JSON object using double quotes. Example: [CreateTask] {{"title": "Schedule weekly sync"}}
2. Each tool call must be on its own line. List several calls on separate lines to run more than one.
3. Do not explain how tools work internally. Include the token and JSON payload when you want to run one.
4. If no tool is needed, answer with guidance or clarifying questions. Never invent tool names.
5. Always include a short natural-language reply for the human. The reply comes first, followed by any tool calls.

Context for this conversation:
- Current ISO time: {current_time}
- Slack user mention: <@{user_id}>
- Channel ID: {channel_id}

Communication style:
- Default to English unless the user prefers another language.
- Be decisive, concise, and action-oriented.
- Ask targeted clarification questions when required information is missing.
- Remember that tools will not run unless you output the bracketed token.
"#
    )
}

pub struct Orchestrator {
    model: Arc<dyn ChatModel>,
    registry: Arc<ToolRegistry>,
}

impl Orchestrator {
    pub fn new(model: Arc<dyn ChatModel>, registry: Arc<ToolRegistry>) -> Self {
        Self { model, registry }
    }

    /// Model failures propagate; tool failures only land in the trace.
    pub async fn run(
        &self,
        history: &[ConversationMessage],
        ctx: &ToolContext,
    ) -> Result<OrchestratorOutput> {
        let tools = self.registry.list().await;
        let system_prompt = build_system_prompt(&tools, &ctx.user_id, &ctx.channel_id, Utc::now());

        let raw_response = self.model.complete(Some(&system_prompt), history).await?;
        let parsed = extract_tool_calls(&raw_response);

        let mut tool_results = Vec::with_capacity(parsed.calls.len());
        for call in &parsed.calls {
            info!(
                "AI triggered tool [{}] with payload: {}",
                call.name,
                call.raw_arguments.as_deref().unwrap_or("{}")
            );
            let announcement = OutgoingMessage::text(format!("🤖 AI triggered tool [{}]", call.name));
            if let Err(e) = ctx.send(&announcement).await {
                warn!("Failed to announce tool {}: {}", call.name, e);
            }

            let trace = match self.dispatch(call, ctx).await {
                Ok(outcome) => ToolTrace {
                    name: call.name.clone(),
                    status: outcome.status,
                    message: outcome.message,
                },
                Err(e) => {
                    warn!("Tool {} failed: {}", call.name, e);
                    ToolTrace::error(&call.name, trace_message(&e))
                }
            };
            tool_results.push(trace);
        }

        let final_reply = if parsed.cleaned_text.is_empty() {
            EMPTY_REPLY.to_string()
        } else {
            parsed.cleaned_text
        };

        Ok(OrchestratorOutput {
            final_reply,
            raw_response,
            tool_results,
        })
    }

    async fn dispatch(&self, call: &ParsedToolCall, ctx: &ToolContext) -> Result<ToolOutcome> {
        let tool = self
            .registry
            .get(&call.name)
            .await
            .ok_or_else(|| BotError::ToolDispatch("Tool not registered".to_string()))?;

        let args = match call.raw_arguments.as_deref() {
            Some(raw) => serde_json::from_str::<serde_json::Value>(raw).map_err(|e| {
                warn!("Bad payload for {}: {}", call.name, e);
                BotError::ToolDispatch("Failed to parse JSON payload".to_string())
            })?,
            None => serde_json::json!({}),
        };
        tool.execute(&args, ctx).await
    }
}

/// Dispatch problems are reported verbatim, handler errors in their user-facing form.
fn trace_message(err: &BotError) -> String {
    match err {
        BotError::ToolDispatch(msg) => msg.clone(),
        other => other.user_message(),
    }
}
