//! Test doubles shared by the bot unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::cards::OutgoingMessage;
use super::error::{BotError, Result};
use super::gateway::MessagingGateway;
use super::llm::ChatModel;
use super::tool_registry::ToolContext;
use crate::shared::models::{
    ConversationMessage, DatabaseError, NewTask, Task, TaskFilter, TaskOrder, TaskPatch,
};
use crate::shared::store::{MemoryTaskStore, TaskStore};

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub channel: String,
    pub thread_ts: Option<String>,
    pub message: OutgoingMessage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ephemeral {
    pub channel: String,
    pub user: String,
    pub text: String,
}

/// Records every outbound message. `fail_sends` makes `send` error out.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<Sent>>,
    ephemeral: Mutex<Vec<Ephemeral>>,
    fail_sends: AtomicBool,
}

impl RecordingGateway {
    pub fn failing() -> Self {
        let gateway = Self::default();
        gateway.fail_sends.store(true, Ordering::SeqCst);
        gateway
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_sends.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|s| s.message.fallback_text().to_string())
            .collect()
    }

    pub fn ephemeral(&self) -> Vec<Ephemeral> {
        self.ephemeral.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn send(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        message: &OutgoingMessage,
    ) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(BotError::Delivery("gateway down".to_string()));
        }
        self.sent.lock().unwrap().push(Sent {
            channel: channel.to_string(),
            thread_ts: thread_ts.map(str::to_string),
            message: message.clone(),
        });
        Ok(())
    }

    async fn send_ephemeral(&self, channel: &str, user: &str, text: &str) -> Result<()> {
        self.ephemeral.lock().unwrap().push(Ephemeral {
            channel: channel.to_string(),
            user: user.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Replies with queued responses in order; an exhausted queue is a model error.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<(Option<String>, Vec<ConversationMessage>)>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        let model = Self::default();
        model
            .replies
            .lock()
            .unwrap()
            .push_back(Err(BotError::Model("model offline".to_string())));
        model
    }

    pub fn prompts(&self) -> Vec<(Option<String>, Vec<ConversationMessage>)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(
        &self,
        system_prompt: Option<&str>,
        messages: &[ConversationMessage],
    ) -> Result<String> {
        self.prompts
            .lock()
            .unwrap()
            .push((system_prompt.map(str::to_string), messages.to_vec()));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BotError::Model("no scripted reply".to_string())))
    }
}

/// Store whose every call fails, for persistence error paths.
pub struct FailingStore;

#[async_trait]
impl TaskStore for FailingStore {
    async fn create(&self, _task: NewTask) -> std::result::Result<Task, DatabaseError> {
        Err(DatabaseError::Internal("store offline".to_string()))
    }

    async fn find_by_id(&self, _id: &str) -> std::result::Result<Option<Task>, DatabaseError> {
        Err(DatabaseError::Internal("store offline".to_string()))
    }

    async fn update(
        &self,
        _id: &str,
        _patch: TaskPatch,
    ) -> std::result::Result<Task, DatabaseError> {
        Err(DatabaseError::Internal("store offline".to_string()))
    }

    async fn delete(&self, _id: &str) -> std::result::Result<(), DatabaseError> {
        Err(DatabaseError::Internal("store offline".to_string()))
    }

    async fn find_many(
        &self,
        _filter: &TaskFilter,
        _order: TaskOrder,
        _limit: usize,
    ) -> std::result::Result<Vec<Task>, DatabaseError> {
        Err(DatabaseError::Internal("store offline".to_string()))
    }

    async fn mark_reminder_sent(
        &self,
        _id: &str,
        _at: DateTime<Utc>,
    ) -> std::result::Result<bool, DatabaseError> {
        Err(DatabaseError::Internal("store offline".to_string()))
    }
}

pub fn new_task(title: &str, due_at: DateTime<Utc>, assignee: &str) -> NewTask {
    NewTask {
        title: title.to_string(),
        due_at,
        assignee: assignee.to_string(),
        assignees: vec![],
        created_by: "U1".to_string(),
        channel_id: "C1".to_string(),
    }
}

/// Context for channel `C1`, user `U1`, backed by a fresh memory store.
pub fn test_context() -> (ToolContext, Arc<RecordingGateway>) {
    let gateway = Arc::new(RecordingGateway::default());
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    (context_with(gateway.clone(), store), gateway)
}

pub fn context_with(gateway: Arc<RecordingGateway>, store: Arc<dyn TaskStore>) -> ToolContext {
    ToolContext {
        gateway,
        store,
        channel_id: "C1".to_string(),
        user_id: "U1".to_string(),
        raw_text: String::new(),
        thread_ts: Some("1700000000.0001".to_string()),
    }
}
