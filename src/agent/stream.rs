use std::io;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

pub type StreamItem = Result<Bytes, io::Error>;

/// What the agent decided to run, as rendered into the `ai-tool-start` block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentAction {
    pub tool: String,
    #[serde(rename = "toolInput")]
    pub tool_input: Value,
    pub log: String,
}

pub fn render_tool_start(action: &AgentAction) -> String {
    let body = serde_json::to_string(action).unwrap_or_else(|_| "{}".to_string());
    format!("\n```ai-tool-start\n{}\n```\n", body)
}

pub fn render_tool_end(output: &str) -> String {
    format!("\n```ai-tool-end\n{}\n```\n", Value::String(output.to_string()))
}

/// Forwards text to the HTTP body while keeping the full transcript that gets saved.
/// A closed receiver only means the client went away; the transcript keeps growing.
pub struct TranscriptSink {
    tx: UnboundedSender<StreamItem>,
    transcript: String,
}

impl TranscriptSink {
    pub fn new(tx: UnboundedSender<StreamItem>) -> Self {
        Self {
            tx,
            transcript: String::new(),
        }
    }

    pub fn push(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.transcript.push_str(text);
        let _ = self.tx.send(Ok(Bytes::copy_from_slice(text.as_bytes())));
    }

    pub fn tool_start(&mut self, action: &AgentAction) {
        self.push(&render_tool_start(action));
    }

    pub fn tool_end(&mut self, output: &str) {
        self.push(&render_tool_end(output));
    }

    /// Aborts the HTTP body; nothing after this reaches the client.
    pub fn fail(&mut self, message: &str) {
        let _ = self.tx.send(Err(io::Error::other(message.to_string())));
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn into_transcript(self) -> String {
        self.transcript
    }
}
