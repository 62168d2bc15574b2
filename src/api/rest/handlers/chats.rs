use axum::http::StatusCode;
use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::rest::error::{ApiError, ApiResult};
use crate::api::rest::middleware::AuthContext;
use crate::shared::models::{AppState, Chat};

pub async fn list_chats(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Vec<Chat>>> {
    Ok(Json(state.history.get_chats(Some(&auth.user_id)).await))
}

pub async fn clear_chats(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Value>> {
    let cleared = state.history.clear_chats(&auth.user_id).await?;
    Ok(Json(json!({ "cleared": cleared })))
}

pub async fn get_chat(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Chat>> {
    state
        .history
        .get_chat(&id, &auth.user_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Chat not found".to_string()))
}

pub async fn delete_chat(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.history.remove_chat(&id, &auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn share_chat(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Chat>> {
    let chat = state.history.share_chat(&id, &auth.user_id).await?;
    Ok(Json(chat))
}
