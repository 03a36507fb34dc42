//! The task tools the model may invoke.

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::cards::{created_card, task_list_message, ListScope, OutgoingMessage};
use super::draft::{AssigneeSource, TaskDraft};
use super::error::{BotError, Result};
use super::normalize::to_mention;
use super::tool_registry::{Tool, ToolContext, ToolOutcome, ToolRegistry};
use crate::shared::models::{TaskFilter, TaskOrder, TaskPatch};

const LIST_LIMIT: usize = 20;

fn parse_args<T: DeserializeOwned>(args: &serde_json::Value) -> std::result::Result<T, ToolOutcome> {
    if !args.is_object() {
        return Err(ToolOutcome::error("Invalid arguments received."));
    }
    serde_json::from_value(args.clone())
        .map_err(|e| ToolOutcome::error(format!("Invalid arguments received: {}", e)))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Card and notice delivery is best-effort once the store has changed.
async fn notify(ctx: &ToolContext, message: OutgoingMessage) {
    if let Err(e) = ctx.send(&message).await {
        warn!("Failed to post tool result to {}: {}", ctx.channel_id, e);
    }
}

pub async fn register_core_tools(registry: &ToolRegistry) {
    registry.register(Arc::new(CreateTaskTool)).await;
    registry.register(Arc::new(ListTasksTool)).await;
    registry.register(Arc::new(DeleteTaskTool)).await;
    registry.register(Arc::new(UpdateTaskStatusTool)).await;
}

pub struct CreateTaskTool;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskArgs {
    title: Option<String>,
    due_time: Option<String>,
    reminder: Option<String>,
    assignee: Option<String>,
    #[serde(default)]
    assignees: Vec<String>,
}

#[async_trait]
impl Tool for CreateTaskTool {
    fn name(&self) -> &str {
        "CreateTask"
    }

    fn description(&self) -> &str {
        "Create a new task for the team. Include title, dueTime (ISO or relative), and assign responsible Slack users."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "dueTime": {"type": "string", "description": "ISO 8601 or relative time"},
                "reminder": {"type": "string", "description": "Relative phrase such as \"in 30 minutes\""},
                "assignee": {"type": "string", "description": "Slack mention, e.g. <@U123>"},
                "assignees": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["title"]
        })
    }

    fn input_example(&self) -> &str {
        r#"{"title": "Prepare Q4 forecast", "dueTime": "2025-01-05T14:00:00-05:00", "assignee": "<@U123>"}"#
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let args: CreateTaskArgs = match parse_args(args) {
            Ok(args) => args,
            Err(outcome) => return Ok(outcome),
        };
        let Some(title) = non_blank(args.title) else {
            return Ok(ToolOutcome::error("Task title is required."));
        };

        let (assignee, assignee_source) = match non_blank(args.assignee) {
            Some(a) => (a, AssigneeSource::Extracted),
            None => (ctx.user_id.clone(), AssigneeSource::Defaulted),
        };

        let draft = TaskDraft {
            title: Some(title),
            task: None,
            time: non_blank(args.due_time),
            reminder_time: non_blank(args.reminder),
            assignee: Some(assignee),
            assignee_source,
            assignees: args.assignees,
            channel_id: ctx.channel_id.clone(),
            created_by: ctx.user_id.clone(),
            raw_text: ctx.raw_text.clone(),
        };

        let new_task = match draft.into_new_task(Utc::now()) {
            Ok(task) => task,
            Err(BotError::Validation(msg)) => return Ok(ToolOutcome::error(msg)),
            Err(e) => return Err(e),
        };
        let task = ctx.store.create(new_task).await?;
        info!("Created task {} via tool", task.id);

        notify(ctx, OutgoingMessage::Card(created_card(&task))).await;

        Ok(ToolOutcome::success(format!(
            "Created task \"{}\" for {}.",
            task.title,
            to_mention(&task.assignee)
        ))
        .with_data(json!({ "taskId": task.id })))
    }
}

pub struct ListTasksTool;

#[derive(Debug, Deserialize)]
struct ListTasksArgs {
    #[serde(default)]
    scope: ListScope,
}

#[async_trait]
impl Tool for ListTasksTool {
    fn name(&self) -> &str {
        "ListTasks"
    }

    fn description(&self) -> &str {
        "Show the requester a summary of their tasks. Scope can be pending (default), completed, or all."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "scope": {"type": "string", "enum": ["pending", "completed", "all"]}
            }
        })
    }

    fn input_example(&self) -> &str {
        r#"{"scope": "pending"}"#
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let args: ListTasksArgs = match parse_args(args) {
            Ok(args) => args,
            Err(outcome) => return Ok(outcome),
        };

        let filter = TaskFilter {
            completed: args.scope.completed_filter(),
            involving: Some(ctx.user_id.clone()),
            ..Default::default()
        };
        let tasks = ctx
            .store
            .find_many(&filter, TaskOrder::DueDesc, LIST_LIMIT)
            .await?;

        notify(ctx, task_list_message(&tasks, args.scope)).await;

        let scope = serde_json::to_value(args.scope)?;
        Ok(ToolOutcome::success(format!(
            "Listed {} tasks.",
            scope.as_str().unwrap_or("pending")
        ))
        .with_data(json!({ "count": tasks.len() })))
    }
}

pub struct DeleteTaskTool;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskIdArgs {
    task_id: Option<String>,
}

#[async_trait]
impl Tool for DeleteTaskTool {
    fn name(&self) -> &str {
        "DeleteTask"
    }

    fn description(&self) -> &str {
        "Remove a task permanently when it is no longer needed. Requires the taskId."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "taskId": {"type": "string"} },
            "required": ["taskId"]
        })
    }

    fn input_example(&self) -> &str {
        r#"{"taskId": "3f2b8c1e-6a7d-4c1f-9e21-5d0a8b7c6e4f"}"#
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let args: TaskIdArgs = match parse_args(args) {
            Ok(args) => args,
            Err(outcome) => return Ok(outcome),
        };
        let Some(task_id) = non_blank(args.task_id) else {
            return Ok(ToolOutcome::error("A valid taskId is required to delete a task."));
        };

        ctx.store.delete(&task_id).await?;
        info!("Deleted task {} via tool", task_id);

        notify(ctx, OutgoingMessage::text(format!("🗑️ Task {} deleted.", task_id))).await;
        Ok(ToolOutcome::success(format!("Deleted task {}.", task_id)))
    }
}

pub struct UpdateTaskStatusTool;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateTaskStatusArgs {
    task_id: Option<String>,
    completed: Option<bool>,
    note: Option<String>,
}

#[async_trait]
impl Tool for UpdateTaskStatusTool {
    fn name(&self) -> &str {
        "UpdateTaskStatus"
    }

    fn description(&self) -> &str {
        "Mark a task as completed or pending. Provide taskId and completed flag, optional note."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "taskId": {"type": "string"},
                "completed": {"type": "boolean"},
                "note": {"type": "string"}
            },
            "required": ["taskId", "completed"]
        })
    }

    fn input_example(&self) -> &str {
        r#"{"taskId": "3f2b8c1e-6a7d-4c1f-9e21-5d0a8b7c6e4f", "completed": true}"#
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let args: UpdateTaskStatusArgs = match parse_args(args) {
            Ok(args) => args,
            Err(outcome) => return Ok(outcome),
        };
        let Some(task_id) = non_blank(args.task_id) else {
            return Ok(ToolOutcome::error("taskId is required."));
        };
        let Some(completed) = args.completed else {
            return Ok(ToolOutcome::error("completed must be true or false."));
        };
        let note = non_blank(args.note);

        ctx.store
            .update(&task_id, TaskPatch::completion(completed, note.clone()))
            .await?;

        let status_text = if completed {
            "completed"
        } else {
            "marked as pending"
        };
        let mut text = format!("✅ Task {} {}.", task_id, status_text);
        if let Some(note) = &note {
            text.push_str(&format!("\n📝 Note: {}", note));
        }
        notify(ctx, OutgoingMessage::text(text)).await;

        Ok(ToolOutcome::success(format!("Task {} {}.", task_id, status_text)))
    }
}
