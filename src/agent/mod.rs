// Chat agent: model client, tool loop and the tools it can call
pub mod error;
pub mod executor;
pub mod guardrails;
pub mod inference;
pub mod memory;
pub mod splitter;
pub mod stream;
pub mod tool_registry;
pub mod tools;

pub use error::AgentError;
pub use executor::{AgentExecutor, AgentSettings, ChatTurn};
pub use guardrails::Guardrails;
pub use inference::InferenceClient;
pub use memory::{TypesenseClient, VectorMemory};
pub use tools::StandardTools;
