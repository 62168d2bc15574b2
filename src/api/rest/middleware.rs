use crate::api::auth::decode_jwt;
use crate::api::rest::error::ApiError;
use crate::shared::models::AppState;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AuthContext {
    pub user_id: String,
}

/// Guards the protected router; public routes are merged in without this layer.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Extract token from Authorization header
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthorized)?;

    let claims = decode_jwt(token, &state.jwt_secret).map_err(|_| ApiError::Unauthorized)?;
    if claims.sub.is_empty() {
        return Err(ApiError::Unauthorized);
    }

    info!(
        method = %request.method(),
        path = %request.uri().path(),
        user = %claims.sub,
        "API request"
    );

    request
        .extensions_mut()
        .insert(AuthContext { user_id: claims.sub });

    Ok(next.run(request).await)
}
