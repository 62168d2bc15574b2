use std::sync::Arc;

use futures::Stream;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{error, info, warn};

use super::error::{AgentError, Result};
use super::guardrails::Guardrails;
use super::inference::{ChatMessage, ChatModel, ChatRequest, ToolCall};
use super::stream::{AgentAction, StreamItem, TranscriptSink};
use super::tool_registry::ToolRegistry;
use crate::shared::history::ChatHistory;
use crate::shared::ids::new_id;
use crate::shared::models::{Message, ROLE_ASSISTANT, ROLE_USER};

pub const MAX_ITERATIONS_MESSAGE: &str = "Agent stopped due to max iterations.";
const TITLE_CHARS: usize = 100;

/// One request from the chat endpoint.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub id: Option<String>,
    pub user_id: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub chat_model: String,
    pub temperature: f32,
    pub max_iterations: usize,
    pub system_prefix: String,
}

/// Builds the per-user tool set; memory tools are scoped to the caller.
pub trait ToolProvider: Send + Sync {
    fn tools_for(&self, user_id: &str) -> ToolRegistry;
}

impl<F> ToolProvider for F
where
    F: Fn(&str) -> ToolRegistry + Send + Sync,
{
    fn tools_for(&self, user_id: &str) -> ToolRegistry {
        self(user_id)
    }
}

impl AgentAction {
    fn from_call(call: &ToolCall, content: &str) -> Self {
        let tool_input = serde_json::from_str::<Value>(&call.arguments)
            .unwrap_or_else(|_| json!({ "input": call.arguments }));
        Self {
            tool: call.name.clone(),
            tool_input,
            log: format!("Invoking \"{}\" with {}\n{}", call.name, call.arguments, content),
        }
    }
}

pub struct AgentExecutor {
    model: Arc<dyn ChatModel>,
    tools: Arc<dyn ToolProvider>,
    history: Arc<ChatHistory>,
    guardrails: Guardrails,
    settings: AgentSettings,
}

impl AgentExecutor {
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: Arc<dyn ToolProvider>,
        history: Arc<ChatHistory>,
        guardrails: Guardrails,
        settings: AgentSettings,
    ) -> Self {
        Self {
            model,
            tools,
            history,
            guardrails,
            settings,
        }
    }

    /// Validates the turn and starts the run in the background. The returned stream
    /// carries the transcript as it is produced and closes once the chat is saved.
    pub async fn stream(
        self: &Arc<Self>,
        turn: ChatTurn,
    ) -> Result<impl Stream<Item = StreamItem> + Send + 'static> {
        let Some(last) = turn.messages.last() else {
            return Err(AgentError::InvalidInput("No messages provided".to_string()));
        };
        self.guardrails.validate_input(&last.content)?;
        if let Some(id) = &turn.id {
            self.history.check_chat_owner(id, &turn.user_id).await?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            agent.run(turn, tx).await;
        });

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }

    async fn run(&self, turn: ChatTurn, tx: UnboundedSender<StreamItem>) {
        let mut sink = TranscriptSink::new(tx);

        let total_tokens = match self.execute(&turn, &mut sink).await {
            Ok(tokens) => tokens,
            Err(e) => {
                error!(user = %turn.user_id, "Agent run failed: {}", e);
                sink.fail(&e.to_string());
                return;
            }
        };

        let title = chat_title(&turn.messages, total_tokens);
        let id = turn.id.clone().unwrap_or_else(new_id);
        if let Err(e) = self
            .history
            .save_chat(&title, &id, &turn.user_id, &turn.messages, sink.transcript())
            .await
        {
            error!(chat = %id, user = %turn.user_id, "Failed to save chat: {}", e);
        }
    }

    /// Runs the tool loop, streaming into `sink`. Returns the tokens spent across model calls.
    pub async fn execute(&self, turn: &ChatTurn, sink: &mut TranscriptSink) -> Result<i64> {
        let Some((current, previous)) = turn.messages.split_last() else {
            return Err(AgentError::InvalidInput("No messages provided".to_string()));
        };

        let tools = self.tools.tools_for(&turn.user_id);
        let definitions = tools.definitions();

        let mut messages = Vec::with_capacity(previous.len() + 2);
        messages.push(ChatMessage::system(self.settings.system_prefix.as_str()));
        messages.extend(previous.iter().map(to_chat_message));
        messages.push(ChatMessage::user(current.content.as_str()));

        info!(
            user = %turn.user_id,
            history = previous.len(),
            tools = ?tools.list_tools(),
            "Starting agent run"
        );

        let mut total_tokens = 0i64;
        for iteration in 1..=self.settings.max_iterations {
            let request = ChatRequest {
                model: &self.settings.chat_model,
                messages: &messages,
                tools: &definitions,
                temperature: self.settings.temperature,
            };
            let response = self
                .model
                .stream_chat(request, &mut |token: &str| sink.push(token))
                .await?;
            total_tokens += response.total_tokens.unwrap_or(0);

            if response.tool_calls.is_empty() {
                info!(user = %turn.user_id, iteration, total_tokens, "Agent finished");
                return Ok(total_tokens);
            }

            messages.push(ChatMessage::assistant_tool_calls(
                &response.content,
                &response.tool_calls,
            ));
            for call in &response.tool_calls {
                let action = AgentAction::from_call(call, &response.content);
                sink.tool_start(&action);

                let output = tools.execute_tool(&call.name, &action.tool_input).await;
                sink.tool_end(&output);

                let observation = self.guardrails.clip_tool_output(&call.name, &output);
                messages.push(ChatMessage::tool_result(&call.id, observation));
            }
        }

        warn!(
            user = %turn.user_id,
            max_iterations = self.settings.max_iterations,
            "Agent hit the iteration cap"
        );
        sink.push(MAX_ITERATIONS_MESSAGE);
        Ok(total_tokens)
    }
}

fn to_chat_message(message: &Message) -> ChatMessage {
    match message.role.as_str() {
        ROLE_USER => ChatMessage::user(message.content.as_str()),
        ROLE_ASSISTANT => ChatMessage::assistant(message.content.as_str()),
        "system" => ChatMessage::system(message.content.as_str()),
        _ => ChatMessage::user(message.content.as_str()),
    }
}

fn chat_title(messages: &[Message], total_tokens: i64) -> String {
    let first: String = messages
        .first()
        .map(|m| m.content.chars().take(TITLE_CHARS).collect())
        .unwrap_or_default();
    format!("{} ({} tokens)", first, total_tokens)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::StreamExt;

    use super::*;
    use crate::agent::inference::ModelResponse;
    use crate::agent::tool_registry::{input_text, Tool};
    use crate::shared::store::MemoryStore;
    use crate::shared::history::HistoryError;

    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<ModelResponse>>>,
        fallback: ModelResponse,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<ModelResponse>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                fallback: ModelResponse::default(),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn looping() -> Self {
            Self {
                fallback: tool_reply("echo", r#"{"input":"again"}"#, Some(1)),
                ..Self::new(Vec::new())
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn stream_chat(
            &self,
            request: ChatRequest<'_>,
            on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
        ) -> Result<ModelResponse> {
            self.seen.lock().unwrap().push(request.messages.to_vec());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))?;
            for word in reply.content.split_inclusive(' ') {
                on_token(word);
            }
            Ok(reply)
        }

        async fn complete(&self, _request: ChatRequest<'_>) -> Result<ModelResponse> {
            unreachable!("the executor only streams")
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the input"
        }

        async fn execute(&self, args: &Value) -> anyhow::Result<String> {
            Ok(format!("echo: {}", input_text(args)))
        }
    }

    fn text_reply(content: &str, tokens: i64) -> Result<ModelResponse> {
        Ok(ModelResponse {
            content: content.to_string(),
            total_tokens: Some(tokens),
            ..ModelResponse::default()
        })
    }

    fn tool_reply(name: &str, args: &str, tokens: Option<i64>) -> ModelResponse {
        ModelResponse {
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: name.to_string(),
                arguments: args.to_string(),
            }],
            total_tokens: tokens,
            ..ModelResponse::default()
        }
    }

    fn executor(
        model: Arc<ScriptedModel>,
        max_iterations: usize,
    ) -> (Arc<AgentExecutor>, Arc<ChatHistory>) {
        let history = Arc::new(ChatHistory::new(Arc::new(MemoryStore::new())));
        let tools = |_user: &str| {
            let mut registry = ToolRegistry::new();
            registry.register_tool(Box::new(EchoTool));
            registry
        };
        let agent = AgentExecutor::new(
            model,
            Arc::new(tools),
            history.clone(),
            Guardrails::new(1_000, 1_000),
            AgentSettings {
                chat_model: "test-model".to_string(),
                temperature: 0.0,
                max_iterations,
                system_prefix: "You are a test".to_string(),
            },
        );
        (Arc::new(agent), history)
    }

    fn turn(id: Option<&str>, contents: &[(&str, &str)]) -> ChatTurn {
        ChatTurn {
            id: id.map(str::to_string),
            user_id: "alice".to_string(),
            messages: contents
                .iter()
                .map(|(role, content)| Message::new(*role, *content))
                .collect(),
        }
    }

    async fn collect(agent: &Arc<AgentExecutor>, turn: ChatTurn) -> (String, bool) {
        let items: Vec<StreamItem> = agent.stream(turn).await.unwrap().collect().await;
        let failed = items.iter().any(|i| i.is_err());
        let text = items
            .into_iter()
            .filter_map(|i| i.ok())
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .collect();
        (text, failed)
    }

    #[tokio::test]
    async fn plain_answer_is_streamed_and_saved() {
        let model = ScriptedModel::new(vec![text_reply("Hello there", 12)]);
        let (agent, history) = executor(Arc::new(model), 15);

        let (text, failed) = collect(&agent, turn(Some("c1"), &[("user", "hi")])).await;
        assert!(!failed);
        assert_eq!(text, "Hello there");

        let chat = history.get_chat("c1", "alice").await.unwrap().unwrap();
        assert_eq!(chat.title, "hi (12 tokens)");
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[1], Message::new(ROLE_ASSISTANT, "Hello there"));
    }

    #[tokio::test]
    async fn history_and_prefix_reach_the_model() {
        let model = Arc::new(ScriptedModel::new(vec![text_reply("ok", 1)]));
        let (agent, _) = executor(model.clone(), 15);
        let mut sink = TranscriptSink::new(mpsc::unbounded_channel().0);

        let conversation = turn(
            None,
            &[("user", "first"), ("assistant", "answer"), ("user", "second")],
        );
        assert_eq!(agent.execute(&conversation, &mut sink).await.unwrap(), 1);
        assert_eq!(sink.transcript(), "ok");

        let seen = model.seen.lock().unwrap();
        let roles: Vec<&str> = seen[0].iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(seen[0][0].content.as_deref(), Some("You are a test"));
        assert_eq!(seen[0][3].content.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn tool_calls_are_rendered_and_tokens_summed() {
        let model = ScriptedModel::new(vec![
            Ok(tool_reply("echo", r#"{"input":"ping"}"#, Some(5))),
            text_reply("done", 7),
        ]);
        let (agent, history) = executor(Arc::new(model), 15);

        let (text, failed) = collect(&agent, turn(Some("c2"), &[("user", "use a tool")])).await;
        assert!(!failed);
        assert!(text.starts_with("\n```ai-tool-start\n"));
        assert!(text.contains(r#""tool":"echo""#));
        assert!(text.contains(r#""toolInput":{"input":"ping"}"#));
        assert!(text.contains("Invoking \\\"echo\\\" with {\\\"input\\\":\\\"ping\\\"}"));
        assert!(text.contains("\n```ai-tool-end\n\"echo: ping\"\n```\n"));
        assert!(text.ends_with("done"));

        let chat = history.get_chat("c2", "alice").await.unwrap().unwrap();
        assert_eq!(chat.title, "use a tool (12 tokens)");
        assert_eq!(chat.messages[1].content, text);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_an_observation() {
        let model = ScriptedModel::new(vec![
            Ok(tool_reply("missing", "not json", None)),
            text_reply("sorry", 1),
        ]);
        let (agent, _) = executor(Arc::new(model), 15);

        let (text, _) = collect(&agent, turn(None, &[("user", "go")])).await;
        assert!(text.contains(r#""toolInput":{"input":"not json"}"#));
        assert!(text.contains("\"missing is not a valid tool, try another one.\""));
    }

    #[tokio::test]
    async fn iteration_cap_stops_and_still_saves() {
        let (agent, history) = executor(Arc::new(ScriptedModel::looping()), 2);

        let (text, failed) = collect(&agent, turn(Some("c3"), &[("user", "loop forever")])).await;
        assert!(!failed);
        assert_eq!(text.matches("ai-tool-start").count(), 2);
        assert!(text.ends_with(MAX_ITERATIONS_MESSAGE));

        let chat = history.get_chat("c3", "alice").await.unwrap().unwrap();
        assert_eq!(chat.title, "loop forever (2 tokens)");
    }

    #[tokio::test]
    async fn model_failure_aborts_without_saving() {
        let model = ScriptedModel::new(vec![Err(AgentError::Model("overloaded".to_string()))]);
        let (agent, history) = executor(Arc::new(model), 15);

        let (_, failed) = collect(&agent, turn(Some("c4"), &[("user", "hi")])).await;
        assert!(failed);
        assert!(history.get_chat("c4", "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_turns_are_rejected_and_blank_input_runs() {
        let model = Arc::new(ScriptedModel::new(vec![text_reply("ok", 1)]));
        let (agent, history) = executor(model, 15);
        assert!(matches!(
            agent.stream(turn(None, &[])).await.err(),
            Some(AgentError::InvalidInput(_))
        ));

        let (text, failed) = collect(&agent, turn(Some("blank"), &[("user", "  ")])).await;
        assert!(!failed);
        assert_eq!(text, "ok");
        assert!(history.get_chat("blank", "alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn foreign_chat_id_is_refused_before_running() {
        let model = Arc::new(ScriptedModel::new(vec![text_reply("mine", 1)]));
        let (agent, history) = executor(model.clone(), 15);
        let original = history
            .save_chat("bob's", "c9", "bob", &[Message::new(ROLE_USER, "hi")], "hello")
            .await
            .unwrap();

        assert!(matches!(
            agent.stream(turn(Some("c9"), &[("user", "take over")])).await.err(),
            Some(AgentError::History(HistoryError::Unauthorized))
        ));
        assert!(model.seen.lock().unwrap().is_empty());
        assert_eq!(history.get_chat("c9", "bob").await.unwrap().unwrap(), original);
    }

    #[test]
    fn titles_are_clipped_to_one_hundred_chars() {
        let long = "é".repeat(150);
        let title = chat_title(&[Message::new(ROLE_USER, long)], 3);
        assert_eq!(title, format!("{} (3 tokens)", "é".repeat(100)));
    }
}
