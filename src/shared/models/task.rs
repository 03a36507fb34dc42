use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub due_at: DateTime<Utc>,
    pub assignee: String,
    pub assignees: Vec<String>,
    pub created_by: String,
    pub channel_id: String,
    pub completed: bool,
    pub not_completed_reason: Option<String>,
    pub deadline_reminder_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Creator, primary assignee, or any listed assignee.
    pub fn involves(&self, user_id: &str) -> bool {
        self.created_by == user_id
            || self.assignee == user_id
            || self.assignees.iter().any(|a| a == user_id)
    }
}

/// Validated input for `TaskStore::create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub due_at: DateTime<Utc>,
    pub assignee: String,
    pub assignees: Vec<String>,
    pub created_by: String,
    pub channel_id: String,
}

impl NewTask {
    /// Trims the title, and makes sure the assignee list is non-empty, de-duplicated
    /// and contains the primary assignee (first).
    pub fn validated(mut self) -> Result<Self, String> {
        self.title = self.title.trim().to_string();
        if self.title.is_empty() {
            return Err("task title must not be empty".to_string());
        }
        self.assignee = self.assignee.trim().to_string();
        if self.assignee.is_empty() {
            return Err("task assignee must not be empty".to_string());
        }

        let mut assignees = vec![self.assignee.clone()];
        for a in self.assignees.drain(..) {
            let a = a.trim().to_string();
            if !a.is_empty() && !assignees.contains(&a) {
                assignees.push(a);
            }
        }
        self.assignees = assignees;
        Ok(self)
    }

    pub fn into_task(self, id: String, now: DateTime<Utc>) -> Task {
        Task {
            id,
            title: self.title,
            due_at: self.due_at,
            assignee: self.assignee,
            assignees: self.assignees,
            created_by: self.created_by,
            channel_id: self.channel_id,
            completed: false,
            not_completed_reason: None,
            deadline_reminder_sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update. `None` leaves a column untouched; for the nullable columns
/// `Some(None)` clears the value. Titles are fixed at creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub due_at: Option<DateTime<Utc>>,
    pub completed: Option<bool>,
    pub not_completed_reason: Option<Option<String>>,
    pub deadline_reminder_sent_at: Option<Option<DateTime<Utc>>>,
}

impl TaskPatch {
    pub fn completion(completed: bool, reason: Option<String>) -> Self {
        Self {
            completed: Some(completed),
            not_completed_reason: Some(if completed { None } else { reason }),
            ..Default::default()
        }
    }

    pub fn apply(&self, task: &mut Task, now: DateTime<Utc>) {
        if let Some(due_at) = self.due_at {
            task.due_at = due_at;
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(reason) = &self.not_completed_reason {
            task.not_completed_reason = reason.clone();
        }
        if let Some(sent_at) = self.deadline_reminder_sent_at {
            task.deadline_reminder_sent_at = sent_at;
        }
        task.updated_at = now;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub completed: Option<bool>,
    pub reminder_sent: Option<bool>,
    pub due_after: Option<DateTime<Utc>>,
    pub due_before: Option<DateTime<Utc>>,
    pub involving: Option<String>,
}

impl TaskFilter {
    /// Incomplete, not yet reminded, due inside `[from, until]`.
    pub fn reminder_candidates(from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            completed: Some(false),
            reminder_sent: Some(false),
            due_after: Some(from),
            due_before: Some(until),
            involving: None,
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(completed) = self.completed {
            if task.completed != completed {
                return false;
            }
        }
        if let Some(sent) = self.reminder_sent {
            if task.deadline_reminder_sent_at.is_some() != sent {
                return false;
            }
        }
        if let Some(after) = self.due_after {
            if task.due_at < after {
                return false;
            }
        }
        if let Some(before) = self.due_before {
            if task.due_at > before {
                return false;
            }
        }
        if let Some(user) = &self.involving {
            if !task.involves(user) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskOrder {
    #[default]
    DueAsc,
    DueDesc,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task() -> NewTask {
        NewTask {
            title: "  Ship the report ".to_string(),
            due_at: Utc::now(),
            assignee: "U1".to_string(),
            assignees: vec!["U2".to_string(), "U1".to_string(), "U2".to_string()],
            created_by: "U1".to_string(),
            channel_id: "C1".to_string(),
        }
    }

    #[test]
    fn test_validated_trims_and_dedupes_assignees() {
        let task = new_task().validated().unwrap();
        assert_eq!(task.title, "Ship the report");
        assert_eq!(task.assignees, vec!["U1".to_string(), "U2".to_string()]);
    }

    #[test]
    fn test_validated_rejects_blank_title() {
        let mut task = new_task();
        task.title = "   ".to_string();
        assert!(task.validated().is_err());
    }

    #[test]
    fn test_filter_matches_reminder_candidates() {
        let now = Utc::now();
        let mut task = new_task()
            .validated()
            .unwrap()
            .into_task("t1".to_string(), now);
        task.due_at = now + chrono::Duration::hours(1);

        let filter = TaskFilter::reminder_candidates(now, now + chrono::Duration::days(7));
        assert!(filter.matches(&task));

        task.deadline_reminder_sent_at = Some(now);
        assert!(!filter.matches(&task));
    }

    #[test]
    fn test_completion_patch_clears_reason_when_completed() {
        let now = Utc::now();
        let mut task = new_task()
            .validated()
            .unwrap()
            .into_task("t1".to_string(), now);
        TaskPatch::completion(false, Some("blocked".to_string())).apply(&mut task, now);
        assert_eq!(task.not_completed_reason.as_deref(), Some("blocked"));
        TaskPatch::completion(true, Some("ignored".to_string())).apply(&mut task, now);
        assert!(task.completed);
        assert!(task.not_completed_reason.is_none());
    }

    #[test]
    fn test_patch_keeps_title_and_clears_marker() {
        let now = Utc::now();
        let mut task = new_task()
            .validated()
            .unwrap()
            .into_task("t1".to_string(), now);
        task.deadline_reminder_sent_at = Some(now);

        let later = now + chrono::Duration::minutes(15);
        TaskPatch {
            due_at: Some(later),
            deadline_reminder_sent_at: Some(None),
            ..Default::default()
        }
        .apply(&mut task, later);

        assert_eq!(task.title, "Ship the report");
        assert_eq!(task.due_at, later);
        assert!(task.deadline_reminder_sent_at.is_none());
        assert_eq!(task.updated_at, later);
    }
}
