//! Tool executor contract and registry
//!
//! The conversation engine consumes tools through the narrow `ToolExecutor`
//! contract: given a tool-call request, return a tool-role message or fail.
//! `ToolRegistry` is the standard implementation, dispatching calls by name
//! to registered `Tool` objects.

use crate::error::{Error, Result};
use conclave_llm::{Message, ToolCall, ToolDefinition};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Tool executor contract consumed by conversation sessions
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute a tool call and return the tool-role result message
    async fn execute(&self, call: &ToolCall) -> Result<Message>;
}

/// A callable tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Tool schema offered to the model
    fn definition(&self) -> ToolDefinition;

    /// Run the tool with parsed JSON arguments
    async fn run(&self, args: serde_json::Value) -> Result<serde_json::Value>;
}

/// Registry of tools keyed by name
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its declared name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        debug!(tool = %name, "Registering tool");
        self.tools.insert(name, tool);
    }

    /// Look up a tool by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// All registered tool names, sorted
    #[must_use]
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool schemas for the model, sorted by name for stable ordering
    #[must_use]
    pub fn to_llm_tools(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }
}

#[async_trait::async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, call: &ToolCall) -> Result<Message> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| Error::UnknownTool(call.name.clone()))?;

        let args: serde_json::Value =
            serde_json::from_str(&call.arguments).unwrap_or(serde_json::json!({}));

        let start = std::time::Instant::now();
        let output = tool
            .run(args)
            .await
            .map_err(|e| Error::Tool(e.to_string()))?;
        info!(
            tool = %call.name,
            duration_ms = %start.elapsed().as_millis(),
            "Tool completed"
        );

        Ok(Message::tool_response_named(
            &call.id,
            &call.name,
            output.to_string(),
        ))
    }
}
