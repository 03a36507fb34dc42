use thiserror::Error;

use crate::shared::models::DatabaseError;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Tool dispatch error: {0}")]
    ToolDispatch(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] DatabaseError),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BotError {
    /// Text shown to the person whose request failed.
    pub fn user_message(&self) -> String {
        match self {
            BotError::Validation(msg) => format!("⚠️ {}", msg),
            BotError::Extraction(_) => {
                "I couldn't understand that, please try rephrasing~".to_string()
            }
            BotError::ToolDispatch(msg) => format!("⚠️ {}", msg),
            BotError::Persistence(DatabaseError::NotFound(_)) => {
                "❌ That task no longer exists.".to_string()
            }
            BotError::Persistence(_) => {
                "❌ Something went wrong saving the task, please try again later.".to_string()
            }
            BotError::Model(_) | BotError::Request(_) | BotError::Json(_) => {
                "❌ The assistant is unavailable right now, please try again later.".to_string()
            }
            BotError::Delivery(_) => "❌ Could not deliver the message.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
