//! Button clicks on task cards.

use std::sync::Arc;

use chrono::Duration;
use tracing::{error, info, warn};

use super::cards::{format_due, TaskAction};
use super::error::{BotError, Result};
use super::gateway::MessagingGateway;
use crate::shared::models::{DatabaseError, TaskPatch};
use crate::shared::store::TaskStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionClick {
    pub action_id: String,
    /// Task id carried on the button.
    pub value: String,
    pub user_id: String,
    pub channel_id: Option<String>,
}

pub struct ActionHandler {
    store: Arc<dyn TaskStore>,
    gateway: Arc<dyn MessagingGateway>,
}

impl ActionHandler {
    pub fn new(store: Arc<dyn TaskStore>, gateway: Arc<dyn MessagingGateway>) -> Self {
        Self { store, gateway }
    }

    /// Applies the click and acknowledges it to the clicker. Returns the
    /// acknowledgement, or `None` for buttons this bot does not own.
    pub async fn handle(&self, click: &ActionClick) -> Option<String> {
        let Some(action) = TaskAction::from_action_id(&click.action_id) else {
            warn!("Ignoring unknown action {}", click.action_id);
            return None;
        };

        let reply = match self.apply(action, click.value.trim()).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(
                    "{} on task {} failed: {}",
                    click.action_id, click.value, e
                );
                failure_reply(action, &e)
            }
        };

        match &click.channel_id {
            Some(channel) => {
                if let Err(e) = self
                    .gateway
                    .send_ephemeral(channel, &click.user_id, &reply)
                    .await
                {
                    warn!("Failed to acknowledge {} to {}: {}", click.action_id, click.user_id, e);
                }
            }
            None => warn!("No channel on {} click, acknowledgement dropped", click.action_id),
        }

        Some(reply)
    }

    async fn apply(&self, action: TaskAction, task_id: &str) -> Result<String> {
        if task_id.is_empty() {
            return Err(BotError::Validation("The button carried no task id.".to_string()));
        }

        match action {
            TaskAction::Complete => {
                self.store
                    .update(task_id, TaskPatch::completion(true, None))
                    .await?;
                info!("Task {} completed from a card", task_id);
                Ok(format!("✅ Task marked as complete (ID: {})", task_id))
            }
            TaskAction::NotCompleted => {
                let task = self
                    .store
                    .update(task_id, TaskPatch::completion(false, None))
                    .await?;
                Ok(format!(
                    "📝 \"{}\" is marked as not completed. What's blocking it? Reply here with a short reason so the team can help.",
                    task.title
                ))
            }
            TaskAction::Delay15m => self.delay(task_id, Duration::minutes(15)).await,
            TaskAction::Delay60m => self.delay(task_id, Duration::hours(1)).await,
            TaskAction::Delete => {
                self.store.delete(task_id).await?;
                info!("Task {} deleted from a card", task_id);
                Ok(format!("🗑️ Task deleted (ID: {})", task_id))
            }
        }
    }

    /// Moves the deadline and re-arms the reminder for it.
    async fn delay(&self, task_id: &str, by: Duration) -> Result<String> {
        let task = self
            .store
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("task {}", task_id)))?;

        let due_at = task.due_at + by;
        let patch = TaskPatch {
            due_at: Some(due_at),
            deadline_reminder_sent_at: Some(None),
            ..Default::default()
        };
        self.store.update(task_id, patch).await?;

        let label = if by >= Duration::hours(1) {
            "1 hour"
        } else {
            "15 minutes"
        };
        Ok(format!(
            "⏱ Delayed by {} (new time: {})",
            label,
            format_due(due_at)
        ))
    }
}

fn failure_reply(action: TaskAction, err: &BotError) -> String {
    match (action, err) {
        (_, BotError::Persistence(DatabaseError::NotFound(_))) | (_, BotError::Validation(_)) => {
            err.user_message()
        }
        (TaskAction::Delay15m | TaskAction::Delay60m, _) => {
            "❌ Delay failed, please try again later".to_string()
        }
        _ => "❌ Update failed, please try again later".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::bot::testing::{new_task, FailingStore, RecordingGateway};
    use crate::shared::store::MemoryTaskStore;

    fn click(action_id: &str, value: &str) -> ActionClick {
        ActionClick {
            action_id: action_id.to_string(),
            value: value.to_string(),
            user_id: "U2".to_string(),
            channel_id: Some("C1".to_string()),
        }
    }

    async fn setup() -> (ActionHandler, Arc<MemoryTaskStore>, Arc<RecordingGateway>, String) {
        let store = Arc::new(MemoryTaskStore::new());
        let gateway = Arc::new(RecordingGateway::default());
        let task = store
            .create(new_task("Ship", Utc::now() + Duration::hours(2), "U2"))
            .await
            .unwrap();
        (
            ActionHandler::new(store.clone(), gateway.clone()),
            store,
            gateway,
            task.id,
        )
    }

    #[tokio::test]
    async fn test_complete_aliases_mark_done() {
        for action_id in ["task_complete", "task_completed", "complete_task"] {
            let (handler, store, gateway, id) = setup().await;
            let reply = handler.handle(&click(action_id, &id)).await.unwrap();
            assert_eq!(reply, format!("✅ Task marked as complete (ID: {})", id));
            assert!(store.find_by_id(&id).await.unwrap().unwrap().completed);

            let acks = gateway.ephemeral();
            assert_eq!(acks.len(), 1);
            assert_eq!(acks[0].user, "U2");
            assert_eq!(acks[0].channel, "C1");
        }
    }

    #[tokio::test]
    async fn test_delay_moves_due_time_and_rearms_reminder() {
        let (handler, store, _gateway, id) = setup().await;
        let before = store.find_by_id(&id).await.unwrap().unwrap();
        store.mark_reminder_sent(&id, Utc::now()).await.unwrap();

        let reply = handler
            .handle(&click("task_delay_15m", &id))
            .await
            .unwrap();
        assert!(reply.starts_with("⏱ Delayed by 15 minutes"));

        let after = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(after.due_at, before.due_at + Duration::minutes(15));
        assert!(after.deadline_reminder_sent_at.is_none());

        handler
            .handle(&click("task_delay_60m", &id))
            .await
            .unwrap();
        let later = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(later.due_at, before.due_at + Duration::minutes(75));
    }

    #[tokio::test]
    async fn test_not_completed_asks_for_reason() {
        let (handler, store, _gateway, id) = setup().await;
        let reply = handler
            .handle(&click("task_not_completed", &id))
            .await
            .unwrap();
        assert!(reply.contains("\"Ship\""));
        assert!(reply.contains("reason"));
        assert!(!store.find_by_id(&id).await.unwrap().unwrap().completed);
    }

    #[tokio::test]
    async fn test_delete_then_missing_task() {
        let (handler, store, gateway, id) = setup().await;
        handler.handle(&click("task_delete", &id)).await.unwrap();
        assert!(store.find_by_id(&id).await.unwrap().is_none());

        let reply = handler
            .handle(&click("task_delay_15m", &id))
            .await
            .unwrap();
        assert_eq!(reply, "❌ That task no longer exists.");
        assert_eq!(gateway.ephemeral().len(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_is_acknowledged() {
        let gateway = Arc::new(RecordingGateway::default());
        let handler = ActionHandler::new(Arc::new(FailingStore), gateway.clone());

        let reply = handler
            .handle(&click("task_complete", "t-1"))
            .await
            .unwrap();
        assert_eq!(reply, "❌ Update failed, please try again later");

        let reply = handler
            .handle(&click("task_delay_60m", "t-1"))
            .await
            .unwrap();
        assert_eq!(reply, "❌ Delay failed, please try again later");
        assert_eq!(gateway.ephemeral().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_action_is_ignored() {
        let (handler, _store, gateway, id) = setup().await;
        assert!(handler.handle(&click("open_modal", &id)).await.is_none());
        assert!(gateway.ephemeral().is_empty());
    }
}
