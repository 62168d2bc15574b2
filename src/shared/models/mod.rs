use std::sync::Arc;

pub mod chat;
pub mod prompt;

pub use chat::{Chat, Message, ROLE_ASSISTANT, ROLE_USER};
pub use prompt::Prompt;

use crate::agent::AgentExecutor;
use crate::shared::history::ChatHistory;

// Application state
#[derive(Clone)]
pub struct AppState {
    pub history: Arc<ChatHistory>,
    pub agent: Arc<AgentExecutor>,
    pub jwt_secret: String,
}
