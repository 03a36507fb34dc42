use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::models::{DatabaseError, NewTask, Task, TaskFilter, TaskOrder, TaskPatch};

/// Persistence boundary for tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: NewTask) -> Result<Task, DatabaseError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>, DatabaseError>;

    /// Fails with `DatabaseError::NotFound` for unknown ids.
    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Task, DatabaseError>;

    /// Fails with `DatabaseError::NotFound` for unknown ids.
    async fn delete(&self, id: &str) -> Result<(), DatabaseError>;

    async fn find_many(
        &self,
        filter: &TaskFilter,
        order: TaskOrder,
        limit: usize,
    ) -> Result<Vec<Task>, DatabaseError>;

    /// Sets the deadline-reminder marker only when it is still unset.
    /// Returns `true` when this call set it.
    async fn mark_reminder_sent(&self, id: &str, at: DateTime<Utc>)
        -> Result<bool, DatabaseError>;
}

/// Process-local store, used when no database is configured and in tests.
#[derive(Clone, Default)]
pub struct MemoryTaskStore {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, task: NewTask) -> Result<Task, DatabaseError> {
        let task = task.validated().map_err(DatabaseError::Internal)?;
        let id = uuid::Uuid::new_v4().to_string();
        let task = task.into_task(id.clone(), Utc::now());

        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&id) {
            return Err(DatabaseError::Unique(id));
        }
        tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>, DatabaseError> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Task, DatabaseError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;
        patch.apply(task, Utc::now());
        Ok(task.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), DatabaseError> {
        self.tasks
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))
    }

    async fn find_many(
        &self,
        filter: &TaskFilter,
        order: TaskOrder,
        limit: usize,
    ) -> Result<Vec<Task>, DatabaseError> {
        let tasks = self.tasks.read().await;
        let mut found: Vec<Task> = tasks.values().filter(|t| filter.matches(t)).cloned().collect();
        match order {
            TaskOrder::DueAsc => found.sort_by(|a, b| a.due_at.cmp(&b.due_at).then(a.id.cmp(&b.id))),
            TaskOrder::DueDesc => found.sort_by(|a, b| b.due_at.cmp(&a.due_at).then(a.id.cmp(&b.id))),
        }
        found.truncate(limit);
        Ok(found)
    }

    async fn mark_reminder_sent(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;
        if task.deadline_reminder_sent_at.is_some() {
            return Ok(false);
        }
        task.deadline_reminder_sent_at = Some(at);
        task.updated_at = Utc::now();
        Ok(true)
    }
}
