use std::collections::{HashMap, VecDeque};

use tokio::sync::RwLock;

use crate::shared::models::ConversationMessage;

pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Bounded per-thread message log. Lives for the process lifetime only.
pub struct ConversationStore {
    limit: usize,
    threads: RwLock<HashMap<String, VecDeque<ConversationMessage>>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl ConversationStore {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            threads: RwLock::new(HashMap::new()),
        }
    }

    /// `channel:thread_ts` inside a thread, the bare channel otherwise.
    pub fn key_for(channel_id: &str, thread_ts: Option<&str>) -> String {
        match thread_ts.filter(|t| !t.is_empty()) {
            Some(ts) => format!("{}:{}", channel_id, ts),
            None => channel_id.to_string(),
        }
    }

    pub async fn get(&self, key: &str) -> Vec<ConversationMessage> {
        self.threads
            .read()
            .await
            .get(key)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Appends, evicting the oldest entries beyond the limit.
    pub async fn append(&self, key: &str, message: ConversationMessage) {
        let mut threads = self.threads.write().await;
        let history = threads.entry(key.to_string()).or_default();
        history.push_back(message);
        while history.len() > self.limit {
            history.pop_front();
        }
    }
}
