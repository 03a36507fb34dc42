//! Routes inbound chat messages and button clicks.
//!
//! Reminder requests, and any follow-up while a draft is open, go through slot
//! filling. Everything else goes to the orchestrator with the thread history.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info};

use super::actions::{ActionClick, ActionHandler};
use super::cards::{created_card, OutgoingMessage};
use super::error::Result;
use super::gateway::MessagingGateway;
use super::history::ConversationStore;
use super::normalize::strip_leading_mention;
use super::orchestrator::Orchestrator;
use super::slot_filling::{PendingStore, SlotFillingEngine, SlotOutcome};
use super::tool_registry::ToolContext;
use crate::shared::models::ConversationMessage;
use crate::shared::store::TaskStore;

const NOT_CONFIGURED: &str = "🤖 The assistant is not configured yet. You can still create reminders, e.g. \"remind me to send the report in 30 minutes\".";
const CANCELLED: &str = "👌 Okay, I dropped that reminder.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub text: String,
    pub author_id: String,
    pub channel_id: String,
    pub thread_ts: Option<String>,
    pub ts: String,
}

impl InboundMessage {
    /// Replies go into the message's thread, or start one under it.
    pub fn reply_thread(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}

pub fn is_reminder_request(text: &str) -> bool {
    text.to_lowercase().contains("remind") || text.contains("提醒")
}

/// One async mutex per key; idle entries are dropped on the next acquire.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct MessageHandler {
    gateway: Arc<dyn MessagingGateway>,
    store: Arc<dyn TaskStore>,
    slot_filling: SlotFillingEngine,
    orchestrator: Option<Orchestrator>,
    history: ConversationStore,
    actions: ActionHandler,
    locks: KeyedLocks,
    bot_user_id: Option<String>,
}

impl MessageHandler {
    pub fn new(
        gateway: Arc<dyn MessagingGateway>,
        store: Arc<dyn TaskStore>,
        slot_filling: SlotFillingEngine,
        orchestrator: Option<Orchestrator>,
        history: ConversationStore,
        bot_user_id: Option<String>,
    ) -> Self {
        Self {
            actions: ActionHandler::new(store.clone(), gateway.clone()),
            gateway,
            store,
            slot_filling,
            orchestrator,
            history,
            locks: KeyedLocks::default(),
            bot_user_id,
        }
    }

    /// Never fails: errors are logged and reported back into the thread.
    pub async fn handle_message(&self, msg: &InboundMessage) {
        if let Err(e) = self.process(msg, Utc::now()).await {
            error!(
                "Failed to handle message {} from {} in {}: {}",
                msg.ts, msg.author_id, msg.channel_id, e
            );
            let notice = OutgoingMessage::text(e.user_message());
            if let Err(e) = self
                .gateway
                .send(&msg.channel_id, Some(msg.reply_thread()), &notice)
                .await
            {
                error!("Failed to report error to {}: {}", msg.channel_id, e);
            }
        }
    }

    pub async fn handle_action(&self, click: &ActionClick) -> Option<String> {
        self.actions.handle(click).await
    }

    async fn process(&self, msg: &InboundMessage, now: DateTime<Utc>) -> Result<()> {
        let text = strip_leading_mention(&msg.text, self.bot_user_id.as_deref());
        if text.is_empty() {
            debug!("Ignoring empty message {}", msg.ts);
            return Ok(());
        }

        let key = PendingStore::key_for(&msg.channel_id, &msg.author_id);
        let _guard = self.locks.acquire(&key).await;

        if self.slot_filling.pending().has(&key, now).await || is_reminder_request(&text) {
            self.fill_slots(msg, now).await
        } else {
            self.converse(msg, &text).await
        }
    }

    async fn fill_slots(&self, msg: &InboundMessage, now: DateTime<Utc>) -> Result<()> {
        let outcome = self
            .slot_filling
            .handle(&msg.text, &msg.channel_id, &msg.author_id, now)
            .await?;

        let reply = match outcome {
            SlotOutcome::Ask { question, .. } => OutgoingMessage::text(question),
            SlotOutcome::Created(task) => OutgoingMessage::Card(created_card(&task)),
            SlotOutcome::Cancelled => OutgoingMessage::text(CANCELLED),
        };
        self.gateway
            .send(&msg.channel_id, Some(msg.reply_thread()), &reply)
            .await
    }

    async fn converse(&self, msg: &InboundMessage, text: &str) -> Result<()> {
        let ctx = ToolContext {
            gateway: self.gateway.clone(),
            store: self.store.clone(),
            channel_id: msg.channel_id.clone(),
            user_id: msg.author_id.clone(),
            raw_text: text.to_string(),
            thread_ts: Some(msg.reply_thread().to_string()),
        };

        let Some(orchestrator) = &self.orchestrator else {
            return ctx.send(&OutgoingMessage::text(NOT_CONFIGURED)).await;
        };

        // Keyed by the thread the reply lands in, top-level mentions included.
        let key = ConversationStore::key_for(&msg.channel_id, Some(msg.reply_thread()));
        self.history
            .append(&key, ConversationMessage::user(text))
            .await;
        let history = self.history.get(&key).await;

        let output = orchestrator.run(&history, &ctx).await?;
        info!(
            "Orchestrator ran {} tool call(s) for {}",
            output.tool_results.len(),
            msg.author_id
        );
        self.history
            .append(&key, ConversationMessage::assistant(output.raw_response.clone()))
            .await;

        ctx.send(&OutgoingMessage::text(output.final_reply.clone()))
            .await?;

        let failures: Vec<String> = output
            .failed()
            .map(|t| {
                format!(
                    "• [{}] {}",
                    t.name,
                    t.message.as_deref().unwrap_or("failed")
                )
            })
            .collect();
        if !failures.is_empty() {
            let notice = format!("⚠️ Some actions did not go through:\n{}", failures.join("\n"));
            ctx.send(&OutgoingMessage::text(notice)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bot::testing::{RecordingGateway, ScriptedModel};
    use crate::bot::slot_filling::LiteralExtractor;
    use crate::bot::tool_registry::ToolRegistry;
    use crate::bot::tools::register_core_tools;
    use crate::shared::models::{TaskFilter, TaskOrder};
    use crate::shared::store::MemoryTaskStore;

    async fn handler(
        model: Option<ScriptedModel>,
    ) -> (MessageHandler, Arc<RecordingGateway>, Arc<MemoryTaskStore>) {
        let gateway = Arc::new(RecordingGateway::default());
        let store = Arc::new(MemoryTaskStore::new());
        let bot = Some("UBOT".to_string());
        let slot_filling = SlotFillingEngine::new(
            Arc::new(LiteralExtractor),
            store.clone(),
            Arc::new(PendingStore::new(None)),
            bot.clone(),
        );

        let orchestrator = match model {
            Some(model) => {
                let registry = Arc::new(ToolRegistry::new());
                register_core_tools(&registry).await;
                Some(Orchestrator::new(Arc::new(model), registry))
            }
            None => None,
        };

        let handler = MessageHandler::new(
            gateway.clone(),
            store.clone(),
            slot_filling,
            orchestrator,
            ConversationStore::default(),
            bot,
        );
        (handler, gateway, store)
    }

    fn message(text: &str, ts: &str) -> InboundMessage {
        InboundMessage {
            text: text.to_string(),
            author_id: "U1".to_string(),
            channel_id: "C1".to_string(),
            thread_ts: None,
            ts: ts.to_string(),
        }
    }

    #[test]
    fn test_reminder_requests_are_detected() {
        assert!(is_reminder_request("Remind me to stretch"));
        assert!(is_reminder_request("提醒我喝水"));
        assert!(!is_reminder_request("list my tasks"));
    }

    #[tokio::test]
    async fn test_complete_reminder_creates_task_card_in_thread() {
        let (handler, gateway, store) = handler(None).await;
        handler
            .handle_message(&message("<@UBOT> remind me to ship the report in 30 minutes", "1.0"))
            .await;

        let sent = gateway.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].thread_ts.as_deref(), Some("1.0"));
        assert!(matches!(sent[0].message, OutgoingMessage::Card(_)));
        assert!(sent[0].message.fallback_text().contains("Task created"));

        let tasks = store
            .find_many(&TaskFilter::default(), TaskOrder::DueAsc, 10)
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].assignee, "U1");
    }

    #[tokio::test]
    async fn test_follow_up_goes_to_open_draft() {
        let (handler, gateway, store) = handler(None).await;
        handler
            .handle_message(&message("remind me to ship the report", "1.0"))
            .await;
        handler.handle_message(&message("in 20 minutes", "2.0")).await;

        let sent = gateway.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0].message, OutgoingMessage::Text(_)));
        assert!(matches!(sent[1].message, OutgoingMessage::Card(_)));
        assert_eq!(
            store
                .find_many(&TaskFilter::default(), TaskOrder::DueAsc, 10)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_cancel_discards_open_draft() {
        let (handler, gateway, _store) = handler(None).await;
        handler
            .handle_message(&message("remind me to ship the report", "1.0"))
            .await;
        handler.handle_message(&message("cancel", "2.0")).await;
        assert_eq!(gateway.texts().last().map(String::as_str), Some(CANCELLED));

        // no draft left, so this is conversation again
        handler.handle_message(&message("in 20 minutes", "3.0")).await;
        assert_eq!(gateway.texts().last().map(String::as_str), Some(NOT_CONFIGURED));
    }

    #[tokio::test]
    async fn test_conversation_runs_orchestrator_and_keeps_history() {
        let model = ScriptedModel::new(["Here you go\n[ListTasks] {\"scope\": \"all\"}"]);
        let (handler, gateway, _store) = handler(Some(model)).await;
        handler.handle_message(&message("what's on my plate?", "1.0")).await;

        let texts = gateway.texts();
        assert_eq!(texts[0], "🤖 AI triggered tool [ListTasks]");
        assert_eq!(texts.last().map(String::as_str), Some("Here you go"));

        let history = handler.history.get("C1:1.0").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], ConversationMessage::user("what's on my plate?"));
        assert_eq!(
            history[1],
            ConversationMessage::assistant("Here you go\n[ListTasks] {\"scope\": \"all\"}")
        );
    }

    #[tokio::test]
    async fn test_thread_reply_sees_top_level_exchange() {
        let model = Arc::new(ScriptedModel::new(["Nice to meet you, Kim", "Your name is Kim"]));
        let gateway = Arc::new(RecordingGateway::default());
        let store = Arc::new(MemoryTaskStore::new());
        let registry = Arc::new(ToolRegistry::new());
        register_core_tools(&registry).await;
        let handler = MessageHandler::new(
            gateway.clone(),
            store.clone(),
            SlotFillingEngine::new(
                Arc::new(LiteralExtractor),
                store,
                Arc::new(PendingStore::new(None)),
                Some("UBOT".to_string()),
            ),
            Some(Orchestrator::new(model.clone(), registry)),
            ConversationStore::default(),
            Some("UBOT".to_string()),
        );

        handler
            .handle_message(&message("<@UBOT> my name is Kim", "1.0"))
            .await;
        let mut reply = message("what is my name?", "2.0");
        reply.thread_ts = Some("1.0".to_string());
        handler.handle_message(&reply).await;

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        assert_eq!(
            prompts[1].1,
            vec![
                ConversationMessage::user("my name is Kim"),
                ConversationMessage::assistant("Nice to meet you, Kim"),
                ConversationMessage::user("what is my name?"),
            ]
        );
        assert!(gateway.sent().iter().all(|s| s.thread_ts.as_deref() == Some("1.0")));
    }

    #[tokio::test]
    async fn test_tool_only_reply_is_logged_verbatim() {
        let model = ScriptedModel::new(["[ListTasks] {\"scope\": \"all\"}"]);
        let (handler, _gateway, _store) = handler(Some(model)).await;
        handler.handle_message(&message("list", "1.0")).await;

        let history = handler.history.get("C1:1.0").await;
        assert_eq!(
            history.last(),
            Some(&ConversationMessage::assistant("[ListTasks] {\"scope\": \"all\"}"))
        );
    }

    #[tokio::test]
    async fn test_failed_tool_calls_are_reported() {
        let model = ScriptedModel::new(["Trying\n[Bogus] {}"]);
        let (handler, gateway, _store) = handler(Some(model)).await;
        handler.handle_message(&message("do something", "1.0")).await;

        let last = gateway.texts().pop().unwrap();
        assert!(last.contains("[Bogus] Tool not registered"));
    }

    #[tokio::test]
    async fn test_model_failure_is_reported_in_thread() {
        let (handler, gateway, _store) = handler(Some(ScriptedModel::failing())).await;
        handler.handle_message(&message("hello", "1.0")).await;

        let sent = gateway.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].thread_ts.as_deref(), Some("1.0"));
        assert!(sent[0].message.fallback_text().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_keyed_locks_serialise_same_key_only() {
        let locks = KeyedLocks::default();
        let guard = locks.acquire("C1:U1").await;

        let blocked = tokio::time::timeout(Duration::from_millis(20), locks.acquire("C1:U1")).await;
        assert!(blocked.is_err());
        let other = tokio::time::timeout(Duration::from_millis(20), locks.acquire("C1:U2")).await;
        assert!(other.is_ok());

        drop(guard);
        let reacquired = tokio::time::timeout(Duration::from_millis(20), locks.acquire("C1:U1")).await;
        assert!(reacquired.is_ok());
    }
}
