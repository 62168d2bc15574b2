use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

/// Core trait that all tools must implement
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get the tool description
    fn description(&self) -> &str;

    /// Parameters as JSON schema. Tools take one free-text `input` unless they say otherwise.
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "input": {"type": "string"}
            },
            "required": ["input"]
        })
    }

    /// Execute the tool with given arguments
    async fn execute(&self, args: &Value) -> Result<String>;
}

/// Lets one tool instance be shared by the registries built for each request.
#[async_trait]
impl Tool for Arc<dyn Tool> {
    fn name(&self) -> &str {
        self.as_ref().name()
    }

    fn description(&self) -> &str {
        self.as_ref().description()
    }

    fn parameters(&self) -> Value {
        self.as_ref().parameters()
    }

    async fn execute(&self, args: &Value) -> Result<String> {
        self.as_ref().execute(args).await
    }
}

/// Pulls the free-text input out of whatever shape the model produced.
pub fn input_text(args: &Value) -> String {
    match args {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("input") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => args.to_string(),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The tools offered to the model for one conversation turn.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool; a later tool with the same name replaces the earlier one.
    pub fn register_tool(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        if let Some(pos) = self.tools.iter().position(|t| t.name() == name) {
            warn!("Replacing previously registered tool: {}", name);
            self.tools[pos] = tool;
        } else {
            self.tools.push(tool);
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    /// Get list of all available tools, in registration order
    pub fn list_tools(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// OpenAI-compatible function definitions
    pub fn definitions(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters(),
                    }
                })
            })
            .collect()
    }

    /// Runs a tool and always yields an observation for the model; failures become text.
    pub async fn execute_tool(&self, name: &str, args: &Value) -> String {
        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            warn!("Model requested unknown tool '{}'", name);
            return format!("{} is not a valid tool, try another one.", name);
        };

        info!("Executing tool: '{}'", name);
        match tool.execute(args).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Tool '{}' failed: {:#}", name, e);
                format!("Error running {}: {}", name, e)
            }
        }
    }
}
