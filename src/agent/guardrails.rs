use super::error::{AgentError, Result};
use tracing::{debug, warn};

pub struct Guardrails {
    max_message_length: usize,
    max_tool_output_length: usize,
}

impl Guardrails {
    pub fn new(max_message_length: usize, max_tool_output_length: usize) -> Self {
        Self {
            max_message_length,
            max_tool_output_length,
        }
    }

    /// Check if content is within size limits
    pub fn check_message_size(&self, content: &str) -> Result<()> {
        if content.chars().count() > self.max_message_length {
            return Err(AgentError::Guardrail(format!(
                "Message exceeds maximum length of {} characters",
                self.max_message_length
            )));
        }
        Ok(())
    }

    pub fn validate_input(&self, content: &str) -> Result<()> {
        debug!("Validating chat input");
        self.check_message_size(content)
    }

    /// Bounds what a tool can push back into the model context.
    pub fn clip_tool_output(&self, tool: &str, output: &str) -> String {
        match output.char_indices().nth(self.max_tool_output_length) {
            Some((cut, _)) => {
                warn!(
                    tool = %tool,
                    limit = self.max_tool_output_length,
                    "Tool output truncated before returning it to the model"
                );
                format!("{}\n[Output truncated due to length]", &output[..cut])
            }
            None => output.to_string(),
        }
    }
}
