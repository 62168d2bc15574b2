use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::api::rest::{
    auth, handlers, logging_middleware::request_logging_middleware, middleware::auth_middleware,
};
use crate::shared::models::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Public routes
    let public_routes = Router::new()
        .route("/version", get(version))
        .route("/share/{id}", get(handlers::share::get_shared_chat));

    // Protected routes
    let protected_routes = Router::new()
        .route("/auth", get(auth::me))
        .route("/chat", post(handlers::chat::chat))
        // Chat history
        .route("/chats", get(handlers::chats::list_chats))
        .route("/chats", delete(handlers::chats::clear_chats))
        .route("/chats/{id}", get(handlers::chats::get_chat))
        .route("/chats/{id}", delete(handlers::chats::delete_chat))
        .route("/chats/{id}/share", post(handlers::chats::share_chat))
        // Saved prompts
        .route("/prompts", get(handlers::prompts::list_prompts))
        .route("/prompts", post(handlers::prompts::create_prompt))
        .route("/prompts/{id}", delete(handlers::prompts::delete_prompt))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let api_routes = public_routes
        .merge(protected_routes)
        .with_state(state.clone());

    Router::new()
        .nest("/api", api_routes)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn version() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::agent::error::Result as AgentResult;
    use crate::agent::inference::{ChatModel, ChatRequest, ModelResponse};
    use crate::agent::tool_registry::ToolRegistry;
    use crate::agent::{AgentExecutor, AgentSettings, Guardrails};
    use crate::api::auth::create_user_jwt;
    use crate::shared::history::ChatHistory;
    use crate::shared::store::MemoryStore;

    const SECRET: &str = "test-secret";

    struct CannedModel;

    #[async_trait]
    impl ChatModel for CannedModel {
        async fn stream_chat(
            &self,
            _request: ChatRequest<'_>,
            on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
        ) -> AgentResult<ModelResponse> {
            on_token("Hello ");
            on_token("there");
            Ok(ModelResponse {
                content: "Hello there".to_string(),
                total_tokens: Some(3),
                ..ModelResponse::default()
            })
        }

        async fn complete(&self, _request: ChatRequest<'_>) -> AgentResult<ModelResponse> {
            Ok(ModelResponse::default())
        }
    }

    fn app() -> Router {
        let history = Arc::new(ChatHistory::new(Arc::new(MemoryStore::new())));
        let agent = AgentExecutor::new(
            Arc::new(CannedModel),
            Arc::new(|_: &str| ToolRegistry::new()),
            history.clone(),
            Guardrails::new(50, 1_000),
            AgentSettings {
                chat_model: "test-model".to_string(),
                temperature: 0.0,
                max_iterations: 3,
                system_prefix: "You are a test".to_string(),
            },
        );
        create_router(Arc::new(AppState {
            history,
            agent: Arc::new(agent),
            jwt_secret: SECRET.to_string(),
        }))
    }

    fn bearer(user: &str) -> String {
        format!("Bearer {}", create_user_jwt(user, SECRET, 1).unwrap().token)
    }

    fn request(method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(header::AUTHORIZATION, bearer(user));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(app, req).await;
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, value)
    }

    async fn start_chat(app: &Router, user: &str, id: &str) -> String {
        let body = json!({
            "id": id,
            "messages": [{ "role": "user", "content": "hi" }],
        });
        let resp = app
            .clone()
            .oneshot(request("POST", "/api/chat", Some(user), Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn version_is_public() {
        let (status, body) = send_json(&app(), request("GET", "/api/version", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "olliechat");
    }

    #[tokio::test]
    async fn protected_routes_require_a_valid_token() {
        let app = app();
        let (status, body) = send_json(&app, request("GET", "/api/chats", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "message": "Unauthorized" }));

        let forged = Request::builder()
            .uri("/api/chats")
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", create_user_jwt("alice", "other", 1).unwrap().token),
            )
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, forged).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send_json(&app, request("GET", "/api/auth", Some("alice"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "user": "alice" }));
    }

    #[tokio::test]
    async fn chat_streams_then_lands_in_history() {
        let app = app();
        assert_eq!(start_chat(&app, "alice", "c1").await, "Hello there");

        let (status, chats) = send_json(&app, request("GET", "/api/chats", Some("alice"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(chats.as_array().unwrap().len(), 1);
        assert_eq!(chats[0]["id"], "c1");
        assert_eq!(chats[0]["title"], "hi (3 tokens)");
        assert_eq!(chats[0]["messages"][1]["content"], "Hello there");

        let (status, chat) =
            send_json(&app, request("GET", "/api/chats/c1", Some("alice"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(chat["path"], "/chat/c1");

        let (status, _) = send(&app, request("GET", "/api/chats/c1", Some("bob"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn chat_rejects_empty_and_oversized_input() {
        let app = app();
        let empty = json!({ "messages": [] });
        let (status, _) = send(&app, request("POST", "/api/chat", Some("alice"), Some(empty))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let long = json!({ "messages": [{ "role": "user", "content": "x".repeat(51) }] });
        let (status, body) =
            send_json(&app, request("POST", "/api/chat", Some("alice"), Some(long))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn share_makes_a_chat_public() {
        let app = app();
        start_chat(&app, "alice", "c1").await;

        let (status, _) = send(&app, request("GET", "/api/share/c1", None, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, request("POST", "/api/chats/c1/share", Some("bob"), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, shared) =
            send_json(&app, request("POST", "/api/chats/c1/share", Some("alice"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(shared["sharePath"], "/share/c1");

        let (status, public) = send_json(&app, request("GET", "/api/share/c1", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(public["id"], "c1");
    }

    #[tokio::test]
    async fn foreign_ids_cannot_overwrite_chats_or_prompts() {
        let app = app();
        start_chat(&app, "bob", "c1").await;
        let (_, before) = send_json(&app, request("GET", "/api/chats/c1", Some("bob"), None)).await;
        send(
            &app,
            request("POST", "/api/prompts", Some("bob"), Some(json!({ "id": "p1", "text": ["bob"] }))),
        )
        .await;

        let hijack = json!({
            "id": "c1",
            "messages": [{ "role": "user", "content": "mine now" }],
        });
        let (status, body) =
            send_json(&app, request("POST", "/api/chat", Some("mallory"), Some(hijack))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "message": "Unauthorized" }));

        let (status, _) = send(
            &app,
            request("POST", "/api/prompts", Some("mallory"), Some(json!({ "id": "p1", "text": ["x"] }))),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, after) = send_json(&app, request("GET", "/api/chats/c1", Some("bob"), None)).await;
        assert_eq!(after, before);
        let (_, prompts) = send_json(&app, request("GET", "/api/prompts", Some("bob"), None)).await;
        assert_eq!(prompts[0]["text"], json!(["bob"]));
        let (_, theirs) = send_json(&app, request("GET", "/api/chats", Some("mallory"), None)).await;
        assert_eq!(theirs, json!([]));
    }

    #[tokio::test]
    async fn delete_and_clear_respect_ownership() {
        let app = app();
        start_chat(&app, "alice", "c1").await;
        start_chat(&app, "alice", "c2").await;

        let (status, _) = send(&app, request("DELETE", "/api/chats/c1", Some("bob"), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, request("DELETE", "/api/chats/c1", Some("alice"), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send_json(&app, request("DELETE", "/api/chats", Some("alice"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "cleared": 1 }));

        let (_, chats) = send_json(&app, request("GET", "/api/chats", Some("alice"), None)).await;
        assert_eq!(chats, json!([]));
    }

    #[tokio::test]
    async fn prompts_can_be_saved_listed_and_removed() {
        let app = app();
        let (status, _) = send(
            &app,
            request("POST", "/api/prompts", Some("alice"), Some(json!({ "text": ["  "] }))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, prompt) = send_json(
            &app,
            request(
                "POST",
                "/api/prompts",
                Some("alice"),
                Some(json!({ "id": "p1", "text": ["Summarize", "this"] })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(prompt["userId"], "alice");

        let (_, prompts) = send_json(&app, request("GET", "/api/prompts", Some("alice"), None)).await;
        assert_eq!(prompts[0]["text"], json!(["Summarize", "this"]));
        let (_, others) = send_json(&app, request("GET", "/api/prompts", Some("bob"), None)).await;
        assert_eq!(others, json!([]));

        let (status, _) = send(&app, request("DELETE", "/api/prompts/p1", Some("bob"), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&app, request("DELETE", "/api/prompts/p1", Some("alice"), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}
