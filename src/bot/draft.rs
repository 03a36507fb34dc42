use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{BotError, Result};
use super::normalize::{parse_relative_time, user_id_of};
use crate::shared::models::NewTask;

/// Structured fields pulled out of one utterance. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default, alias = "reminderTime")]
    pub reminder_time: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub assignees: Option<Vec<String>>,
}

/// How the draft's assignee was decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssigneeSource {
    #[default]
    Missing,
    /// The extraction named someone.
    Extracted,
    /// "remind me" / "me" in the text.
    SelfReference,
    /// A literal "remind <@U> to ..." match.
    Literal,
    /// Nobody was named, so the requester was assumed.
    Defaulted,
}

impl AssigneeSource {
    pub fn is_explicit(&self) -> bool {
        matches!(
            self,
            AssigneeSource::Extracted | AssigneeSource::SelfReference | AssigneeSource::Literal
        )
    }
}

/// A partially specified task awaiting missing fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskDraft {
    pub title: Option<String>,
    pub task: Option<String>,
    pub time: Option<String>,
    pub reminder_time: Option<String>,
    /// User id (or a free-form name when no id could be found).
    pub assignee: Option<String>,
    pub assignee_source: AssigneeSource,
    pub assignees: Vec<String>,
    pub channel_id: String,
    pub created_by: String,
    pub raw_text: String,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl TaskDraft {
    pub fn new(channel_id: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            created_by: created_by.into(),
            ..Default::default()
        }
    }

    pub fn title_text(&self) -> Option<&str> {
        non_blank(&self.title).or_else(|| non_blank(&self.task))
    }

    /// The time as the user (or extraction) phrased it.
    pub fn time_text(&self) -> Option<&str> {
        non_blank(&self.time).or_else(|| non_blank(&self.reminder_time))
    }

    pub fn assignee_id(&self) -> Option<&str> {
        non_blank(&self.assignee)
    }

    /// Resolves the due time: the time field first, then the reminder phrase,
    /// then the raw utterance.
    pub fn resolve_due_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        non_blank(&self.time)
            .and_then(|t| parse_relative_time(t, now))
            .or_else(|| non_blank(&self.reminder_time).and_then(|t| parse_relative_time(t, now)))
            .or_else(|| parse_relative_time(&self.raw_text, now))
    }

    pub fn into_new_task(self, now: DateTime<Utc>) -> Result<NewTask> {
        let title = self
            .title_text()
            .ok_or_else(|| BotError::Validation("Task title is required.".to_string()))?
            .to_string();

        let assignee = self
            .assignee_id()
            .map(|a| user_id_of(a).unwrap_or_else(|| a.to_string()))
            .ok_or_else(|| BotError::Validation("Task assignee is required.".to_string()))?;

        let due_at = self.resolve_due_at(now).ok_or_else(|| {
            BotError::Validation(format!(
                "I couldn't work out when \"{}\" is due. Try an exact time (2025-10-20 09:00) or a relative one (in 30 minutes).",
                title
            ))
        })?;

        let assignees = self
            .assignees
            .iter()
            .map(|a| user_id_of(a).unwrap_or_else(|| a.trim().to_string()))
            .collect();

        NewTask {
            title,
            due_at,
            assignee,
            assignees,
            created_by: self.created_by,
            channel_id: self.channel_id,
        }
        .validated()
        .map_err(BotError::Validation)
    }
}
