//! Platform-neutral message model plus the task card builders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::normalize::to_mention;
use crate::shared::models::Task;

/// Button ids carried on cards. Several legacy ids map to the same action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    Complete,
    NotCompleted,
    Delay15m,
    Delay60m,
    Delete,
}

impl TaskAction {
    pub fn action_id(&self) -> &'static str {
        match self {
            TaskAction::Complete => "task_complete",
            TaskAction::NotCompleted => "task_not_completed",
            TaskAction::Delay15m => "task_delay_15m",
            TaskAction::Delay60m => "task_delay_60m",
            TaskAction::Delete => "task_delete",
        }
    }

    pub fn from_action_id(action_id: &str) -> Option<Self> {
        match action_id {
            "task_complete" | "task_completed" | "complete_task" => Some(TaskAction::Complete),
            "task_not_completed" => Some(TaskAction::NotCompleted),
            "task_delay_15m" => Some(TaskAction::Delay15m),
            "task_delay_60m" => Some(TaskAction::Delay60m),
            "task_delete" => Some(TaskAction::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonStyle {
    Primary,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardAction {
    pub action_id: String,
    pub label: String,
    /// Opaque round-trip value, the task id for every task button.
    pub value: String,
    pub style: Option<ButtonStyle>,
}

impl CardAction {
    fn task_button(
        action: TaskAction,
        label: &str,
        task_id: &str,
        style: Option<ButtonStyle>,
    ) -> Self {
        Self {
            action_id: action.action_id().to_string(),
            label: label.to_string(),
            value: task_id.to_string(),
            style,
        }
    }
}

/// A block of text with its own row of buttons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSection {
    pub text: String,
    pub actions: Vec<CardAction>,
}

/// `text` is the notification fallback. Non-empty `sections` are rendered in
/// place of `text` and `actions`; button ids must be unique within a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub text: String,
    pub actions: Vec<CardAction>,
    #[serde(default)]
    pub sections: Vec<CardSection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    Text(String),
    Card(Card),
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        OutgoingMessage::Text(text.into())
    }

    /// Plain-text rendering, used as the notification fallback.
    pub fn fallback_text(&self) -> &str {
        match self {
            OutgoingMessage::Text(text) => text,
            OutgoingMessage::Card(card) => &card.text,
        }
    }
}

pub fn format_due(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn assignees_text(task: &Task) -> String {
    if task.assignees.is_empty() {
        return to_mention(&task.assignee);
    }
    task.assignees
        .iter()
        .map(|a| to_mention(a))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Confirmation shown after a task is created.
pub fn created_card(task: &Task) -> Card {
    Card {
        text: format!(
            "📝 *Task created*\n• Title: *{}*\n• Assignees: {}\n• Due: {}",
            task.title,
            assignees_text(task),
            format_due(task.due_at)
        ),
        actions: vec![
            CardAction::task_button(
                TaskAction::Complete,
                "✅ Complete",
                &task.id,
                Some(ButtonStyle::Primary),
            ),
            CardAction::task_button(
                TaskAction::Delete,
                "🗑️ Delete",
                &task.id,
                Some(ButtonStyle::Danger),
            ),
        ],
        sections: Vec::new(),
    }
}

/// Deadline reminder sent to the assignee. `intro` is prepended when given.
pub fn reminder_card(task: &Task, intro: Option<&str>) -> Card {
    let mut text = String::new();
    if let Some(intro) = intro.map(str::trim).filter(|i| !i.is_empty()) {
        text.push_str(intro);
        text.push_str("\n\n");
    }
    text.push_str(&format!(
        "🔔 *Task Reminder*\n• Title: *{}*\n• Assignees: {}\n• Time: {}",
        task.title,
        assignees_text(task),
        format_due(task.due_at)
    ));

    Card {
        text,
        actions: vec![
            CardAction::task_button(
                TaskAction::Complete,
                "Completed ✅",
                &task.id,
                Some(ButtonStyle::Primary),
            ),
            CardAction::task_button(
                TaskAction::NotCompleted,
                "Not Completed ❌",
                &task.id,
                Some(ButtonStyle::Danger),
            ),
            CardAction::task_button(TaskAction::Delay15m, "⏱ +15 min", &task.id, None),
            CardAction::task_button(TaskAction::Delay60m, "⏱ +1 hour", &task.id, None),
        ],
        sections: Vec::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListScope {
    #[default]
    Pending,
    Completed,
    All,
}

impl ListScope {
    pub fn completed_filter(&self) -> Option<bool> {
        match self {
            ListScope::Pending => Some(false),
            ListScope::Completed => Some(true),
            ListScope::All => None,
        }
    }
}

/// A summary section, then one section per task carrying that task's buttons.
pub fn task_list_message(tasks: &[Task], scope: ListScope) -> OutgoingMessage {
    if tasks.is_empty() {
        return OutgoingMessage::text(match scope {
            ListScope::Pending => "📋 You have no pending tasks!",
            ListScope::Completed => "📋 You have no completed tasks!",
            ListScope::All => "📋 You have no tasks!",
        });
    }

    let completed = tasks.iter().filter(|t| t.completed).count();
    let pending = tasks.len() - completed;
    let header = match scope {
        ListScope::Pending => format!("Pending Tasks ({})", pending),
        ListScope::Completed => format!("Completed Tasks ({})", completed),
        ListScope::All => format!("All Tasks ({} pending, {} completed)", pending, completed),
    };

    let mut sections = vec![CardSection {
        text: format!("📋 *{}*", header),
        actions: Vec::new(),
    }];
    for task in tasks {
        let (strike, label, emoji) = if task.completed {
            ("~", " (Completed)", "✅")
        } else {
            ("", "", "⏰")
        };
        let mut actions = Vec::new();
        if !task.completed {
            actions.push(CardAction::task_button(
                TaskAction::Complete,
                &format!("✅ {}", task.title),
                &task.id,
                Some(ButtonStyle::Primary),
            ));
        }
        actions.push(CardAction::task_button(
            TaskAction::Delete,
            &format!("🗑️ {}", task.title),
            &task.id,
            None,
        ));
        sections.push(CardSection {
            text: format!(
                "{strike}*{}*{strike}{label}\n{emoji} {}\n👤 {}",
                task.title,
                format_due(task.due_at),
                assignees_text(task)
            ),
            actions,
        });
    }

    let text = sections
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    OutgoingMessage::Card(Card {
        text,
        actions: Vec::new(),
        sections,
    })
}
