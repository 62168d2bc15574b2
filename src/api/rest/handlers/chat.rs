use axum::{
    body::Body,
    extract::{Extension, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::agent::ChatTurn;
use crate::api::rest::error::{ApiError, ApiResult};
use crate::api::rest::middleware::AuthContext;
use crate::shared::models::{AppState, Message};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub messages: Vec<Message>,
}

/// Streams the agent's transcript as plain text. The chat is saved before the body ends.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Response> {
    let messages: Vec<Message> = req
        .messages
        .into_iter()
        .filter(Message::is_conversational)
        .collect();

    info!(
        user = %auth.user_id,
        chat = req.id.as_deref().unwrap_or("<new>"),
        messages = messages.len(),
        "Starting chat turn"
    );

    let stream = state.agent.stream(ChatTurn {
        id: req.id.filter(|id| !id.trim().is_empty()),
        user_id: auth.user_id,
        messages,
    })
    .await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Failed to build response: {}", e)))
}
