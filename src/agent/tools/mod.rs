//! The tools offered to the chat agent.

pub mod browser;
pub mod calculator;
pub mod memory;
pub mod news;
pub mod search;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use super::executor::ToolProvider;
use super::inference::{ChatModel, Embedder};
use super::memory::VectorMemory;
use super::tool_registry::{Tool, ToolRegistry};
use crate::shared::config::OllieConfig;

use browser::WebBrowserTool;
use calculator::CalculatorTool;
use memory::{MemorySearchTool, SaveToMemoryTool};
use news::GoogleNewsTool;
use search::GoogleSearchTool;

const TOOL_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared tool instances plus the per-user memory tools. Search and memory
/// are only offered when their credentials are configured.
pub struct StandardTools {
    search: Option<Arc<dyn Tool>>,
    browser: Arc<dyn Tool>,
    calculator: Arc<dyn Tool>,
    news: Arc<dyn Tool>,
    memory: Option<Arc<VectorMemory>>,
}

impl StandardTools {
    pub fn from_config(
        config: &OllieConfig,
        model: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        memory: Option<Arc<VectorMemory>>,
    ) -> Result<Self> {
        let secrets = &config.secrets;
        let search: Option<Arc<dyn Tool>> = match (&secrets.google_api_key, &secrets.google_cse_id) {
            (Some(key), Some(cse)) => Some(Arc::new(GoogleSearchTool::new(key, cse, TOOL_HTTP_TIMEOUT)?)),
            _ => {
                info!("GOOGLE_API_KEY/GOOGLE_CSE_ID not set; google-custom-search disabled");
                None
            }
        };
        if memory.is_none() {
            info!("Typesense not configured; memory tools disabled");
        }

        let browser = WebBrowserTool::new(
            model,
            embedder,
            &config.model.browser_model,
            config.model.temperature,
            Duration::from_secs(config.model.browser_timeout_secs),
        )?;

        Ok(Self {
            search,
            browser: Arc::new(browser),
            calculator: Arc::new(CalculatorTool),
            news: Arc::new(GoogleNewsTool::new(TOOL_HTTP_TIMEOUT)?),
            memory,
        })
    }
}

impl ToolProvider for StandardTools {
    fn tools_for(&self, user_id: &str) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        if let Some(search) = &self.search {
            registry.register_tool(Box::new(search.clone()));
        }
        registry.register_tool(Box::new(self.browser.clone()));
        registry.register_tool(Box::new(self.calculator.clone()));
        if let Some(memory) = &self.memory {
            registry.register_tool(Box::new(MemorySearchTool::new(memory.clone(), user_id)));
            registry.register_tool(Box::new(SaveToMemoryTool::new(memory.clone(), user_id)));
        }
        registry.register_tool(Box::new(self.news.clone()));
        registry
    }
}
