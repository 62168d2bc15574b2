use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::api::rest::error::{ApiError, ApiResult};
use crate::shared::models::{AppState, Chat};

/// Public: only chats that were explicitly shared are visible here.
pub async fn get_shared_chat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Chat>> {
    state
        .history
        .get_shared_chat(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Chat not found".to_string()))
}
