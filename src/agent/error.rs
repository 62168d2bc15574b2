use thiserror::Error;

use crate::shared::history::HistoryError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Model error: {0}")]
    Model(String),

    #[error("Guardrail violation: {0}")]
    Guardrail(String),

    #[error("Invalid conversation: {0}")]
    InvalidInput(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
