//! Local capabilities a model may invoke mid-conversation.
//!
//! Tools are looked up by name; unknown names are answered with an empty
//! result so a confused model cannot wedge the conversation, and a tool's
//! own failure is folded into its result text so the model can react to it.

pub mod calculator;
pub mod search;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::ToolDefinition;
use crate::core::config::Config;
use crate::core::provider::CompletionProvider;

#[derive(Debug)]
pub struct ToolError(pub String);

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tool execution failed: {}", self.0)
    }
}

impl std::error::Error for ToolError {}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn definition(&self) -> ToolDefinition;
    /// Execute against the raw JSON argument payload the model produced.
    async fn execute(&self, arguments: &str) -> Result<String, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in tool set: calculator and two-tier web search.
    pub fn builtin(config: &Config, provider: Arc<dyn CompletionProvider>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(calculator::Calculator));
        registry.register(Arc::new(search::WebSearch::new(
            provider,
            config.search_model.clone(),
            config.credential_pool().into_iter().next(),
            config.search_api_keys.clone(),
        )));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schema advertised to the provider with the request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<_> = self.tools.values().map(|tool| tool.definition()).collect();
        // Stable order keeps request payloads reproducible.
        definitions.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        definitions
    }

    /// Run one named tool. Unknown tools are no-ops with an empty result;
    /// execution errors become result text instead of aborting the loop.
    pub async fn dispatch(&self, name: &str, arguments: &str) -> String {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "model requested an unknown tool");
            return String::new();
        };
        debug!(tool = name, "executing tool");
        match tool.execute(arguments).await {
            Ok(result) => result,
            Err(err) => {
                warn!(tool = name, "tool failed: {err}");
                format!("Error: {err}")
            }
        }
    }
}
