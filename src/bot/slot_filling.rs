//! Multi-turn clarification of reminder requests.
//!
//! One open draft per `channel:user`. Each utterance is extracted, sanitized and
//! merged onto the open draft; the engine then asks for the next missing field
//! (time, then assignee, then title) or persists the finished task.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::draft::{AssigneeSource, Extraction, TaskDraft};
use super::error::{BotError, Result};
use super::llm::ChatModel;
use super::normalize::{
    extract_mentions, is_time_like, parse_relative_time, strip_leading_mention, to_mention,
};
use super::sanitizer::sanitize;
use crate::shared::models::{ConversationMessage, Task};
use crate::shared::store::TaskStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MissingField {
    Title,
    Time,
    Assignee,
}

impl MissingField {
    /// Order in which missing fields are asked for.
    pub const PRIORITY: [MissingField; 3] =
        [MissingField::Time, MissingField::Assignee, MissingField::Title];
}

/// Missing required fields, in asking order.
pub fn compute_missing(draft: &TaskDraft, now: DateTime<Utc>) -> Vec<MissingField> {
    MissingField::PRIORITY
        .into_iter()
        .filter(|field| match field {
            MissingField::Title => draft.title_text().is_none(),
            MissingField::Time => {
                draft.time_text().is_none() && parse_relative_time(&draft.raw_text, now).is_none()
            }
            MissingField::Assignee => draft.assignee_id().is_none(),
        })
        .collect()
}

fn pick(incoming: Option<String>, base: Option<String>) -> Option<String> {
    match incoming {
        Some(v) if !v.trim().is_empty() => Some(v),
        _ => base,
    }
}

/// Newer non-empty fields win, except that a defaulted assignee never replaces
/// a known one. Channel, creator and the first utterance stay with `base`.
pub fn merge_drafts(base: TaskDraft, incoming: TaskDraft) -> TaskDraft {
    let incoming_assignee_wins = incoming.assignee_source.is_explicit()
        || (incoming.assignee_id().is_some() && base.assignee_id().is_none());

    let (assignee, assignee_source, assignees) = if incoming_assignee_wins {
        (incoming.assignee, incoming.assignee_source, incoming.assignees)
    } else {
        (base.assignee, base.assignee_source, base.assignees)
    };

    TaskDraft {
        title: pick(incoming.title, base.title),
        task: pick(incoming.task, base.task),
        time: pick(incoming.time, base.time),
        reminder_time: pick(incoming.reminder_time, base.reminder_time),
        assignee,
        assignee_source,
        assignees,
        channel_id: base.channel_id,
        created_by: base.created_by,
        raw_text: if base.raw_text.trim().is_empty() {
            incoming.raw_text
        } else {
            base.raw_text
        },
    }
}

/// One question, for the first missing field in priority order.
pub fn build_followup_question(draft: &TaskDraft, missing: &[MissingField]) -> (MissingField, String) {
    let next = MissingField::PRIORITY
        .into_iter()
        .find(|f| missing.contains(f))
        .unwrap_or(MissingField::Title);

    let question = match next {
        MissingField::Time => {
            let subject = draft
                .title_text()
                .map(|t| format!("\"{}\"", t))
                .unwrap_or_else(|| "this task".to_string());
            format!(
                "When should I schedule {}? You can give an exact time (e.g., 2025-10-20 09:00) or a relative time (e.g., in 30 minutes).",
                subject
            )
        }
        MissingField::Assignee => {
            let subject = draft
                .title_text()
                .map(|t| format!("\"{}\"", t))
                .unwrap_or_else(|| "this task".to_string());
            format!(
                "Who should be responsible for {}? If it's you, say \"me\". Otherwise please @ mention the assignee.",
                subject
            )
        }
        MissingField::Title => {
            let who = draft
                .assignee_id()
                .map(to_mention)
                .unwrap_or_else(|| "<unspecified>".to_string());
            let when = draft.time_text().unwrap_or("<unspecified>");
            format!(
                "Got it so far: assignee is {}, time is {}. What's the task in one clear sentence?",
                who, when
            )
        }
    };
    (next, question)
}

#[derive(Debug, Clone)]
pub struct PendingContext {
    pub draft: TaskDraft,
    pub missing: Vec<MissingField>,
    pub updated_at: DateTime<Utc>,
}

impl PendingContext {
    /// The field the last question asked about.
    pub fn asked(&self) -> Option<MissingField> {
        MissingField::PRIORITY
            .into_iter()
            .find(|f| self.missing.contains(f))
    }
}

/// Open drafts keyed by `channel:user`. Entries idle past `ttl` read as absent.
pub struct PendingStore {
    ttl: Option<chrono::Duration>,
    entries: RwLock<HashMap<String, PendingContext>>,
}

impl PendingStore {
    pub fn new(ttl: Option<chrono::Duration>) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn key_for(channel_id: &str, user_id: &str) -> String {
        format!("{}:{}", channel_id, user_id)
    }

    pub async fn get(&self, key: &str, now: DateTime<Utc>) -> Option<PendingContext> {
        let ctx = self.entries.read().await.get(key).cloned()?;
        if let Some(ttl) = self.ttl {
            if now - ctx.updated_at > ttl {
                debug!("Pending draft {} expired", key);
                self.entries.write().await.remove(key);
                return None;
            }
        }
        Some(ctx)
    }

    pub async fn has(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.get(key, now).await.is_some()
    }

    pub async fn set(&self, key: &str, ctx: PendingContext) {
        self.entries.write().await.insert(key.to_string(), ctx);
    }

    pub async fn clear(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

/// Turns free text into structured task fields.
#[async_trait]
pub trait TaskExtractor: Send + Sync {
    async fn extract(&self, text: &str, now: DateTime<Utc>) -> Result<Extraction>;
}

/// Used when no model is configured: the sanitizer's literal rules do all the work.
pub struct LiteralExtractor;

#[async_trait]
impl TaskExtractor for LiteralExtractor {
    async fn extract(&self, _text: &str, _now: DateTime<Utc>) -> Result<Extraction> {
        Ok(Extraction::default())
    }
}

pub struct LlmTaskExtractor {
    model: Arc<dyn ChatModel>,
}

impl LlmTaskExtractor {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    fn prompt(text: &str, now: DateTime<Utc>) -> String {
        format!(
            r#"You are a strict task parser. Convert user input into a JSON object with the following fields:
- title: task title (string)
- time: ISO datetime string (e.g., "2025-08-24T09:00:00Z"). Leave empty if not clear.
- reminder_time: original relative description if given (e.g., "2 minutes later"). Otherwise empty.
- assignee: primary responsible person, prefer Slack mention form (e.g., "<@UXXXX>").
- assignees: array of ALL mentioned users in Slack mention form (e.g., ["<@UXXXX>", "<@UYYYY>"]).
The current time is {}.
Only output valid JSON, nothing else.
Input: """{}""""#,
            now.to_rfc3339(),
            text
        )
    }
}

/// The JSON object inside a reply, tolerating code fences and chatter.
fn json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

#[async_trait]
impl TaskExtractor for LlmTaskExtractor {
    async fn extract(&self, text: &str, now: DateTime<Utc>) -> Result<Extraction> {
        let reply = self
            .model
            .complete(None, &[ConversationMessage::user(Self::prompt(text, now))])
            .await
            .map_err(|e| BotError::Extraction(e.to_string()))?;

        let body = json_object(&reply)
            .ok_or_else(|| BotError::Extraction(format!("no JSON object in reply: {}", reply)))?;
        serde_json::from_str(body)
            .map_err(|e| BotError::Extraction(format!("unparseable extraction: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotOutcome {
    /// A follow-up question; the draft stays open.
    Ask { field: MissingField, question: String },
    Created(Task),
    Cancelled,
}

const CANCEL_WORDS: &[&str] = &["cancel", "never mind", "nevermind", "forget it", "取消", "算了"];

fn is_cancel(text: &str) -> bool {
    let text = text
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c == '。' || c == '！')
        .to_lowercase();
    CANCEL_WORDS.contains(&text.as_str())
}

pub struct SlotFillingEngine {
    extractor: Arc<dyn TaskExtractor>,
    store: Arc<dyn TaskStore>,
    pending: Arc<PendingStore>,
    bot_user_id: Option<String>,
}

impl SlotFillingEngine {
    pub fn new(
        extractor: Arc<dyn TaskExtractor>,
        store: Arc<dyn TaskStore>,
        pending: Arc<PendingStore>,
        bot_user_id: Option<String>,
    ) -> Self {
        Self {
            extractor,
            store,
            pending,
            bot_user_id,
        }
    }

    pub fn pending(&self) -> &Arc<PendingStore> {
        &self.pending
    }

    /// Processes one utterance. Callers serialise calls per `channel:user`.
    pub async fn handle(
        &self,
        text: &str,
        channel_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SlotOutcome> {
        let key = PendingStore::key_for(channel_id, user_id);
        let bot = self.bot_user_id.as_deref();
        let cleaned = strip_leading_mention(text, bot);
        let pending = self.pending.get(&key, now).await;

        if pending.is_some() && is_cancel(&cleaned) {
            self.pending.clear(&key).await;
            info!("Discarded pending draft {}", key);
            return Ok(SlotOutcome::Cancelled);
        }

        let extraction = match self.extractor.extract(&cleaned, now).await {
            Ok(extraction) => extraction,
            Err(e) if pending.is_some() => {
                warn!("Extraction failed during follow-up for {}: {}", key, e);
                Extraction::default()
            }
            Err(e) => return Err(e),
        };

        let mut incoming = sanitize(
            text,
            user_id,
            bot,
            TaskDraft::from_extraction(extraction, channel_id, user_id, text),
        );

        let draft = match pending {
            Some(ctx) => {
                self.fill_asked_field(&mut incoming, &ctx, &cleaned, now);
                merge_drafts(ctx.draft, incoming)
            }
            None => incoming,
        };

        let mut missing = compute_missing(&draft, now);
        let mut draft = draft;
        if missing.is_empty() && draft.resolve_due_at(now).is_none() {
            debug!("Unparseable time for {}, asking again", key);
            draft.time = None;
            draft.reminder_time = None;
            missing = vec![MissingField::Time];
        }

        if !missing.is_empty() {
            let (field, question) = build_followup_question(&draft, &missing);
            self.pending
                .set(
                    &key,
                    PendingContext {
                        draft,
                        missing,
                        updated_at: now,
                    },
                )
                .await;
            return Ok(SlotOutcome::Ask { field, question });
        }

        self.pending.clear(&key).await;
        let new_task = draft.into_new_task(now)?;
        let task = self.store.create(new_task).await?;
        info!("Created task {} for {}", task.id, task.assignee);
        Ok(SlotOutcome::Created(task))
    }

    /// A bare reply answers whatever was asked, when extraction missed it.
    fn fill_asked_field(
        &self,
        incoming: &mut TaskDraft,
        ctx: &PendingContext,
        reply: &str,
        now: DateTime<Utc>,
    ) {
        if incoming.title_text().is_some_and(is_time_like) {
            incoming.title = None;
            incoming.task = None;
        }

        match ctx.asked() {
            Some(MissingField::Time) if incoming.time_text().is_none() => {
                if parse_relative_time(reply, now).is_some() {
                    incoming.reminder_time = Some(reply.trim().to_string());
                }
            }
            Some(MissingField::Assignee) if !incoming.assignee_source.is_explicit() => {
                let bot = self.bot_user_id.as_deref();
                if let Some(id) = extract_mentions(reply)
                    .into_iter()
                    .find(|id| Some(id.as_str()) != bot)
                {
                    incoming.assignees = vec![id.clone()];
                    incoming.assignee = Some(id);
                    incoming.assignee_source = AssigneeSource::Literal;
                }
            }
            Some(MissingField::Title) if incoming.title_text().is_none() => {
                if !reply.trim().is_empty() && !is_time_like(reply) {
                    incoming.title = Some(reply.trim().to_string());
                }
            }
            _ => {}
        }
    }
}
