use axum::{extract::Extension, Json};
use serde_json::{json, Value};

use crate::api::rest::error::ApiResult;
use crate::api::rest::middleware::AuthContext;

pub async fn me(Extension(auth): Extension<AuthContext>) -> ApiResult<Json<Value>> {
    Ok(Json(json!({ "user": auth.user_id })))
}
