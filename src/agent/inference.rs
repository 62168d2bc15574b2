use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

use super::error::{AgentError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionPayload {
    pub name: String,
    pub arguments: String,
}

impl ChatMessage {
    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    pub fn assistant_tool_calls(content: &str, calls: &[ToolCall]) -> Self {
        Self {
            role: "assistant".to_string(),
            content: (!content.is_empty()).then(|| content.to_string()),
            tool_call_id: None,
            tool_calls: calls
                .iter()
                .map(|call| ToolCallPayload {
                    id: call.id.clone(),
                    kind: "function",
                    function: FunctionPayload {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect(),
        }
    }

    pub fn tool_result(tool_call_id: &str, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_call_id: Some(tool_call_id.to_string()),
            tool_calls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string as produced by the model.
    pub arguments: String,
}

#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub total_tokens: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub tools: &'a [Value],
    pub temperature: f32,
}

/// A chat-completions backend. The agent only talks to models through this.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Streams content deltas into `on_token` and returns the assembled turn.
    async fn stream_chat(
        &self,
        request: ChatRequest<'_>,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<ModelResponse>;

    async fn complete(&self, request: ChatRequest<'_>) -> Result<ModelResponse>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Clone)]
pub struct InferenceClient {
    client: Client,
    base_url: String,
    auth_header: Option<String>,
    embedding_model: String,
}

impl InferenceClient {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        embedding_model: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Model(format!("Failed to create inference client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: api_key.map(|key| format!("Bearer {}", key.trim())),
            embedding_model: embedding_model.to_string(),
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(header) = &self.auth_header {
            request = request.header(reqwest::header::AUTHORIZATION, header);
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read response>".to_string());
            return Err(AgentError::Model(format!(
                "Inference service error ({}): {}",
                status, text
            )));
        }
        Ok(resp)
    }
}

pub fn build_payload(request: &ChatRequest<'_>, stream: bool) -> Value {
    let mut payload = json!({
        "model": request.model,
        "messages": request.messages,
        "temperature": request.temperature,
        "stream": stream,
    });
    if stream {
        payload["stream_options"] = json!({ "include_usage": true });
    }
    if !request.tools.is_empty() {
        payload["tools"] = Value::Array(request.tools.to_vec());
    }
    payload
}

#[async_trait]
impl ChatModel for InferenceClient {
    async fn stream_chat(
        &self,
        request: ChatRequest<'_>,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<ModelResponse> {
        let payload = build_payload(&request, true);
        tracing::debug!(model = %request.model, messages = request.messages.len(), "Streaming chat completion");
        let resp = self.post("/chat/completions", &payload).await?;

        let body = Box::pin(resp.bytes_stream().map_err(std::io::Error::other));
        let mut lines = StreamReader::new(body).lines();
        let mut acc = StreamAccumulator::default();

        while let Some(line) = lines.next_line().await? {
            if let Some(delta) = acc.push_line(&line)? {
                on_token(&delta);
            }
            if acc.is_done() {
                break;
            }
        }

        Ok(acc.finish())
    }

    async fn complete(&self, request: ChatRequest<'_>) -> Result<ModelResponse> {
        let payload = build_payload(&request, false);
        let resp = self.post("/chat/completions", &payload).await?;
        let body: Value = resp.json().await?;
        parse_completion(&body)
    }
}

#[async_trait]
impl Embedder for InferenceClient {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let payload = json!({ "model": self.embedding_model, "input": inputs });
        let resp = self.post("/embeddings", &payload).await?;
        let body: Value = resp.json().await?;
        parse_embeddings(&body, inputs.len())
    }
}

fn parse_completion(body: &Value) -> Result<ModelResponse> {
    let choice = body
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .ok_or_else(|| AgentError::Model("Completion response has no choices".to_string()))?;
    let message = choice.get("message").cloned().unwrap_or_else(|| json!({}));

    let tool_calls = message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(i, call)| {
                    let function = call.get("function")?;
                    Some(ToolCall {
                        id: call
                            .get("id")
                            .and_then(|v| v.as_str())
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("call_{}", i + 1)),
                        name: function.get("name")?.as_str()?.to_string(),
                        arguments: function
                            .get("arguments")
                            .and_then(|v| v.as_str())
                            .unwrap_or("{}")
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ModelResponse {
        content: message
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        tool_calls,
        finish_reason: choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        total_tokens: body
            .get("usage")
            .and_then(|u| u.get("total_tokens"))
            .and_then(|v| v.as_i64()),
    })
}

fn parse_embeddings(body: &Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = body
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| AgentError::Model("Embedding response has no data".to_string()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = data
        .iter()
        .enumerate()
        .map(|(pos, item)| {
            let index = item
                .get("index")
                .and_then(|v| v.as_u64())
                .map(|i| i as usize)
                .unwrap_or(pos);
            let vector = item
                .get("embedding")
                .and_then(|v| v.as_array())
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|x| x.as_f64())
                        .map(|x| x as f32)
                        .collect()
                })
                .unwrap_or_default();
            (index, vector)
        })
        .collect();
    indexed.sort_by_key(|(index, _)| *index);

    if indexed.len() != expected {
        return Err(AgentError::Model(format!(
            "Expected {} embeddings, got {}",
            expected,
            indexed.len()
        )));
    }
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[derive(Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Folds an OpenAI-style SSE body, one line at a time, into a [`ModelResponse`].
#[derive(Default)]
pub struct StreamAccumulator {
    content: String,
    finish_reason: Option<String>,
    total_tokens: Option<i64>,
    tool_parts: BTreeMap<u64, PartialToolCall>,
    done: bool,
}

impl StreamAccumulator {
    /// Returns the content delta carried by this line, if any.
    pub fn push_line(&mut self, line: &str) -> Result<Option<String>> {
        let trimmed = line.trim();
        let Some(data) = trimmed.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }
        if data.is_empty() {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(data)?;
        if let Some(error) = value.get("error") {
            return Err(AgentError::Model(format!("Stream error: {}", error)));
        }
        if let Some(total) = value
            .get("usage")
            .and_then(|u| u.get("total_tokens"))
            .and_then(|v| v.as_i64())
        {
            self.total_tokens = Some(total);
        }

        let Some(choice) = value
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
        else {
            return Ok(None);
        };

        if let Some(reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
            self.finish_reason = Some(reason.to_string());
        }

        let Some(delta) = choice.get("delta") else {
            return Ok(None);
        };

        if let Some(calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            self.merge_tool_calls(calls);
        }

        match delta.get("content").and_then(|v| v.as_str()) {
            Some(text) if !text.is_empty() => {
                self.content.push_str(text);
                Ok(Some(text.to_string()))
            }
            _ => Ok(None),
        }
    }

    fn merge_tool_calls(&mut self, calls: &[Value]) {
        for (pos, call) in calls.iter().enumerate() {
            let index = call
                .get("index")
                .and_then(|v| v.as_u64())
                .unwrap_or(pos as u64);
            let part = self.tool_parts.entry(index).or_default();
            if let Some(id) = call.get("id").and_then(|v| v.as_str()) {
                part.id = Some(id.to_string());
            }
            if let Some(function) = call.get("function") {
                if let Some(name) = function.get("name").and_then(|v| v.as_str()) {
                    part.name.push_str(name);
                }
                if let Some(args) = function.get("arguments").and_then(|v| v.as_str()) {
                    part.arguments.push_str(args);
                }
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn finish(self) -> ModelResponse {
        let tool_calls = self
            .tool_parts
            .into_iter()
            .filter(|(_, part)| !part.name.trim().is_empty())
            .map(|(index, part)| ToolCall {
                id: part.id.unwrap_or_else(|| format!("call_{}", index + 1)),
                name: part.name,
                arguments: if part.arguments.trim().is_empty() {
                    "{}".to_string()
                } else {
                    part.arguments
                },
            })
            .collect();

        ModelResponse {
            content: self.content,
            tool_calls,
            finish_reason: self.finish_reason,
            total_tokens: self.total_tokens,
        }
    }
}
