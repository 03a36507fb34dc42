use thiserror::Error;

pub mod message;
pub mod task;

pub use message::{ChatRole, ConversationMessage};
pub use task::{NewTask, Task, TaskFilter, TaskOrder, TaskPatch};

// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(sqlx::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unique constraint violation: {0}")]
    Unique(String),
    #[error("Task not found: {0}")]
    NotFound(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        // MySQL duplicate key (1062 / SQLSTATE 23000)
        if let sqlx::Error::Database(db_err) = &err {
            if let Some(code) = db_err.code() {
                if code == "23000" || code == "1062" {
                    return DatabaseError::Unique(db_err.message().to_string());
                }
            }
        }
        DatabaseError::Connection(err)
    }
}
