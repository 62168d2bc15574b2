use axum::http::StatusCode;
use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::rest::error::{ApiError, ApiResult};
use crate::api::rest::middleware::AuthContext;
use crate::shared::ids::new_id;
use crate::shared::models::{AppState, Prompt};

#[derive(Debug, Deserialize)]
pub struct CreatePromptRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub text: Vec<String>,
}

pub async fn list_prompts(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Vec<Prompt>>> {
    Ok(Json(state.history.get_prompts(Some(&auth.user_id)).await))
}

pub async fn create_prompt(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreatePromptRequest>,
) -> ApiResult<(StatusCode, Json<Prompt>)> {
    if req.text.iter().all(|segment| segment.trim().is_empty()) {
        return Err(ApiError::BadRequest("Prompt text is required".to_string()));
    }

    let id = req
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(new_id);
    let prompt = state
        .history
        .save_prompt(&id, req.text, &auth.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(prompt)))
}

pub async fn delete_prompt(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.history.remove_prompt(&id, &auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
