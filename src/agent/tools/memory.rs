use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::error;

use crate::agent::memory::VectorMemory;
use crate::agent::tool_registry::{input_text, Tool};

pub const SEARCH_FAILED: &str = "Error searching memory";
pub const SAVE_OK: &str = "Saved to memory successfully";
pub const SAVE_FAILED: &str = "Error saving to memory";

pub struct MemorySearchTool {
    memory: Arc<VectorMemory>,
    user_id: String,
}

impl MemorySearchTool {
    pub fn new(memory: Arc<VectorMemory>, user_id: &str) -> Self {
        Self {
            memory,
            user_id: user_id.to_string(),
        }
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "Memory_Search"
    }

    fn description(&self) -> &str {
        "Call this tool to search your memory, input is the search query string"
    }

    async fn execute(&self, args: &Value) -> Result<String> {
        let query = input_text(args);
        match self.memory.search(&self.user_id, &query).await {
            Ok(hits) => Ok(format_hits(&hits)),
            Err(e) => {
                error!(user = %self.user_id, "Memory search failed: {}", e);
                Ok(SEARCH_FAILED.to_string())
            }
        }
    }
}

pub struct SaveToMemoryTool {
    memory: Arc<VectorMemory>,
    user_id: String,
}

impl SaveToMemoryTool {
    pub fn new(memory: Arc<VectorMemory>, user_id: &str) -> Self {
        Self {
            memory,
            user_id: user_id.to_string(),
        }
    }
}

#[async_trait]
impl Tool for SaveToMemoryTool {
    fn name(&self) -> &str {
        "Save_To_Memory"
    }

    fn description(&self) -> &str {
        "Call this tool to save to memory, input is the data to save as a string"
    }

    async fn execute(&self, args: &Value) -> Result<String> {
        let text = input_text(args);
        match self.memory.save(&self.user_id, &text).await {
            Ok(_) => Ok(SAVE_OK.to_string()),
            Err(e) => {
                error!(user = %self.user_id, "Saving to memory failed: {}", e);
                Ok(SAVE_FAILED.to_string())
            }
        }
    }
}

/// Each hit as a JSON string literal, one per line.
fn format_hits(hits: &[String]) -> String {
    hits.iter()
        .map(|hit| Value::String(hit.clone()).to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::agent::error::{AgentError, Result as AgentResult};
    use crate::agent::inference::Embedder;
    use crate::agent::memory::TypesenseClient;
    use crate::agent::splitter::TextSplitter;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _inputs: &[String]) -> AgentResult<Vec<Vec<f32>>> {
            Err(AgentError::Model("embeddings offline".to_string()))
        }
    }

    fn memory() -> Arc<VectorMemory> {
        let typesense = TypesenseClient::new(
            "http://127.0.0.1:9",
            "key",
            "personal_chat_memory",
            Duration::from_millis(200),
        )
        .unwrap();
        Arc::new(VectorMemory::new(
            typesense,
            Arc::new(FailingEmbedder),
            TextSplitter::new(4000, 200),
            4,
        ))
    }

    #[test]
    fn hits_are_json_strings_per_line() {
        let hits = vec!["likes \"tea\"".to_string(), "two\nlines".to_string()];
        assert_eq!(format_hits(&hits), "\"likes \\\"tea\\\"\"\n\"two\\nlines\"");
        assert_eq!(format_hits(&[]), "");
    }

    #[tokio::test]
    async fn failures_become_fixed_messages() {
        let memory = memory();
        let search = MemorySearchTool::new(memory.clone(), "alice");
        let save = SaveToMemoryTool::new(memory, "alice");

        assert_eq!(
            search.execute(&json!({"input": "tea"})).await.unwrap(),
            SEARCH_FAILED
        );
        assert_eq!(
            save.execute(&json!({"input": "alice likes tea"})).await.unwrap(),
            SAVE_FAILED
        );
    }
}
