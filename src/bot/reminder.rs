use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::cards::{format_due, reminder_card, OutgoingMessage};
use super::error::Result;
use super::gateway::MessagingGateway;
use super::llm::ChatModel;
use crate::shared::config::ReminderConfig;
use crate::shared::models::{ConversationMessage, Task, TaskFilter, TaskOrder};
use crate::shared::store::TaskStore;

const SWEEP_LIMIT: usize = 500;
const INTRO_MAX_CHARS: usize = 400;

/// How long before the deadline to remind, given the time left until it.
///
/// Buckets: <=10m -> 5m, <=30m -> 10m, <=2h -> 30m, <=6h -> 1h, <=24h -> 2h,
/// <=72h -> 4h, beyond that 6h.
pub fn lead_time(until_due: Duration) -> Duration {
    if until_due <= Duration::minutes(10) {
        Duration::minutes(5)
    } else if until_due <= Duration::minutes(30) {
        Duration::minutes(10)
    } else if until_due <= Duration::hours(2) {
        Duration::minutes(30)
    } else if until_due <= Duration::hours(6) {
        Duration::hours(1)
    } else if until_due <= Duration::hours(24) {
        Duration::hours(2)
    } else if until_due <= Duration::hours(72) {
        Duration::hours(4)
    } else {
        Duration::hours(6)
    }
}

/// Whether a reminder for a task due at `due_at` should go out at `now`.
pub fn should_fire(now: DateTime<Utc>, due_at: DateTime<Utc>, config: &ReminderConfig) -> bool {
    let until_due = due_at - now;
    if until_due <= Duration::zero() {
        return false;
    }
    let target = due_at - lead_time(until_due);
    let drift = now - target;
    drift.abs() <= config.tolerance || (drift > Duration::zero() && drift <= config.catch_up)
}

/// Writes the friendly line that opens a reminder DM.
pub struct ReminderCopywriter {
    model: Option<Arc<dyn ChatModel>>,
}

const COPY_SYSTEM_PROMPT: &str = r#"You are a Slack assistant. Write a concise, empathetic, 1-2 sentence direct message asking for a quick update on a task that is due soon, and offering help.

Rules:
- Be friendly, supportive and non-accusatory.
- Ask for a brief update, gently ask about blockers and explicitly offer help.
- Keep the message under 240 characters.
- Mention the task title and due time naturally when both look valid. If either is missing or looks like a placeholder, write a generic message instead.
- Never mention system behavior, templates or missing fields.

Return ONLY the message text, without quotes, code fences or commentary."#;

impl ReminderCopywriter {
    pub fn new(model: Option<Arc<dyn ChatModel>>) -> Self {
        Self { model }
    }

    pub fn fallback(task: &Task) -> String {
        format!(
            "Heads up on \"{}\" due {}. How is it going? Mark it complete below, or share a brief update if something is blocking you.",
            task.title,
            format_due(task.due_at)
        )
    }

    /// Model-written intro when a model is configured, the template otherwise
    /// or on any model failure.
    pub async fn intro(&self, task: &Task) -> String {
        let Some(model) = &self.model else {
            return Self::fallback(task);
        };

        let prompt = format!(
            "Task title: {}\nDue time: {}\nWrite the DM prompt.",
            task.title,
            format_due(task.due_at)
        );
        match model
            .complete(Some(COPY_SYSTEM_PROMPT), &[ConversationMessage::user(prompt)])
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().chars().take(INTRO_MAX_CHARS).collect(),
            Ok(_) => Self::fallback(task),
            Err(e) => {
                warn!("Reminder intro generation failed, using fallback: {}", e);
                Self::fallback(task)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub considered: usize,
    pub sent: usize,
    pub failed: usize,
}

pub struct ReminderScheduler {
    store: Arc<dyn TaskStore>,
    gateway: Arc<dyn MessagingGateway>,
    copywriter: ReminderCopywriter,
    config: ReminderConfig,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        gateway: Arc<dyn MessagingGateway>,
        copywriter: ReminderCopywriter,
        config: ReminderConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            copywriter,
            config,
        }
    }

    /// Sweeps every `tick` until the task is aborted. A sweep always finishes
    /// before the next one starts.
    pub async fn run(self: Arc<Self>) {
        info!(
            "Reminder scheduler started, sweeping every {:?}",
            self.config.tick
        );
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match self.sweep(Utc::now()).await {
                Ok(report) if report.sent > 0 || report.failed > 0 => {
                    info!(
                        "Reminder sweep: {} considered, {} sent, {} failed",
                        report.considered, report.sent, report.failed
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Reminder sweep failed: {}", e),
            }
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let filter = TaskFilter::reminder_candidates(now, now + self.config.lookahead);
        let tasks = self
            .store
            .find_many(&filter, TaskOrder::DueAsc, SWEEP_LIMIT)
            .await?;

        let mut report = SweepReport {
            considered: tasks.len(),
            ..Default::default()
        };

        for task in tasks {
            if !should_fire(now, task.due_at, &self.config) {
                continue;
            }
            match self.remind(&task, now).await {
                Ok(true) => report.sent += 1,
                Ok(false) => debug!("Task {} was already reminded", task.id),
                Err(e) => {
                    report.failed += 1;
                    error!("Failed to send reminder for task {}: {}", task.id, e);
                }
            }
        }

        Ok(report)
    }

    async fn remind(&self, task: &Task, now: DateTime<Utc>) -> Result<bool> {
        let intro = self.copywriter.intro(task).await;
        let card = reminder_card(task, Some(&intro));
        self.gateway
            .send(&task.assignee, None, &OutgoingMessage::Card(card))
            .await?;
        info!("Reminder for task {} sent to {}", task.id, task.assignee);
        Ok(self.store.mark_reminder_sent(&task.id, now).await?)
    }
}
