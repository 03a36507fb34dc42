use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::types::Json;
use sqlx::{MySql, Pool, QueryBuilder, Row};
use std::sync::Arc;
use tracing::info;

use super::models::{DatabaseError, NewTask, Task, TaskFilter, TaskOrder, TaskPatch};
use super::store::TaskStore;

const TASK_COLUMNS: &str = "id, title, due_at, assignee, assignees, created_by, channel_id, completed, not_completed_reason, deadline_reminder_sent_at, created_at, updated_at";

/// MySQL-backed task store.
#[derive(Clone)]
pub struct MySqlTaskStore {
    db: Arc<Pool<MySql>>,
}

impl MySqlTaskStore {
    pub async fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { db: Arc::new(pool) };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id VARCHAR(36) NOT NULL PRIMARY KEY,
                title TEXT NOT NULL,
                due_at DATETIME(3) NOT NULL,
                assignee VARCHAR(64) NOT NULL,
                assignees JSON NOT NULL,
                created_by VARCHAR(64) NOT NULL,
                channel_id VARCHAR(64) NOT NULL,
                completed BOOLEAN NOT NULL DEFAULT FALSE,
                not_completed_reason TEXT NULL,
                deadline_reminder_sent_at DATETIME(3) NULL,
                created_at DATETIME(3) NOT NULL,
                updated_at DATETIME(3) NOT NULL,
                INDEX idx_tasks_due (completed, deadline_reminder_sent_at, due_at),
                INDEX idx_tasks_assignee (assignee),
                INDEX idx_tasks_created_by (created_by)
            )
            "#,
        )
        .execute(&*self.db)
        .await?;
        info!("Task schema ready");
        Ok(())
    }
}

fn row_to_task(row: &MySqlRow) -> Result<Task, DatabaseError> {
    let Json(assignees): Json<Vec<String>> = row.try_get("assignees")?;
    Ok(Task {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        due_at: row.try_get("due_at")?,
        assignee: row.try_get("assignee")?,
        assignees,
        created_by: row.try_get("created_by")?,
        channel_id: row.try_get("channel_id")?,
        completed: row.try_get("completed")?,
        not_completed_reason: row.try_get("not_completed_reason")?,
        deadline_reminder_sent_at: row.try_get("deadline_reminder_sent_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl TaskStore for MySqlTaskStore {
    async fn create(&self, task: NewTask) -> Result<Task, DatabaseError> {
        let task = task.validated().map_err(DatabaseError::Internal)?;
        let id = uuid::Uuid::new_v4().to_string();
        let task = task.into_task(id, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO tasks (id, title, due_at, assignee, assignees, created_by, channel_id, completed, not_completed_reason, deadline_reminder_sent_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.title)
        .bind(task.due_at)
        .bind(&task.assignee)
        .bind(Json(&task.assignees))
        .bind(&task.created_by)
        .bind(&task.channel_id)
        .bind(task.completed)
        .bind(&task.not_completed_reason)
        .bind(task.deadline_reminder_sent_at)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&*self.db)
        .await?;

        Ok(task)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>, DatabaseError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Task, DatabaseError> {
        let mut tx = self.db.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ? FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;

        let mut task = row_to_task(&row)?;
        patch.apply(&mut task, Utc::now());

        sqlx::query(
            r#"
            UPDATE tasks
            SET due_at = ?, completed = ?, not_completed_reason = ?, deadline_reminder_sent_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(task.due_at)
        .bind(task.completed)
        .bind(&task.not_completed_reason)
        .bind(task.deadline_reminder_sent_at)
        .bind(task.updated_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(task)
    }

    async fn delete(&self, id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn find_many(
        &self,
        filter: &TaskFilter,
        order: TaskOrder,
        limit: usize,
    ) -> Result<Vec<Task>, DatabaseError> {
        let mut qb: QueryBuilder<MySql> =
            QueryBuilder::new(format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1 = 1"));

        if let Some(completed) = filter.completed {
            qb.push(" AND completed = ").push_bind(completed);
        }
        match filter.reminder_sent {
            Some(true) => {
                qb.push(" AND deadline_reminder_sent_at IS NOT NULL");
            }
            Some(false) => {
                qb.push(" AND deadline_reminder_sent_at IS NULL");
            }
            None => {}
        }
        if let Some(after) = filter.due_after {
            qb.push(" AND due_at >= ").push_bind(after);
        }
        if let Some(before) = filter.due_before {
            qb.push(" AND due_at <= ").push_bind(before);
        }
        if let Some(user) = &filter.involving {
            qb.push(" AND (created_by = ")
                .push_bind(user.clone())
                .push(" OR assignee = ")
                .push_bind(user.clone())
                .push(" OR JSON_CONTAINS(assignees, JSON_QUOTE(")
                .push_bind(user.clone())
                .push(")))");
        }

        qb.push(match order {
            TaskOrder::DueAsc => " ORDER BY due_at ASC, id ASC",
            TaskOrder::DueDesc => " ORDER BY due_at DESC, id ASC",
        });
        qb.push(" LIMIT ").push_bind(limit.min(1000) as i64);

        let rows = qb.build().fetch_all(&*self.db).await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn mark_reminder_sent(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET deadline_reminder_sent_at = ?, updated_at = ?
            WHERE id = ? AND deadline_reminder_sent_at IS NULL
            "#,
        )
        .bind(at)
        .bind(Utc::now())
        .bind(id)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
