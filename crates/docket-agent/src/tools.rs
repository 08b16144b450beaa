use async_trait::async_trait;
use docket_core::{CancellationSignal, ToolCall, ToolError, ToolResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// Metadata describing a tool's interface, offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Name the model calls the tool by.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON schema of the arguments.
    pub parameters_schema: serde_json::Value,
}

/// Uniform interface an agent uses to invoke an external capability.
///
/// Adapters are stateless across invocations and shared between concurrent
/// tasks, so they must not accumulate run-specific state.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    async fn invoke(
        &self,
        arguments: serde_json::Value,
        cancel: &CancellationSignal,
    ) -> Result<serde_json::Value, ToolError>;
}

/// Central registry for all tool adapters, filled at startup.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolAdapter>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Adds a tool under its descriptor name.
    pub fn register(&mut self, tool: Arc<dyn ToolAdapter>) {
        let name = tool.descriptor().name.clone();
        info!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
    }

    /// Tool with the given name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolAdapter>> {
        self.tools.get(name)
    }

    /// Descriptors of the registered tools in `allowed`, sorted by name.
    pub fn descriptors_for(&self, allowed: &BTreeSet<String>) -> Vec<ToolDescriptor> {
        allowed
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.descriptor().clone())
            .collect()
    }

    /// Execute a tool call by name.
    pub async fn invoke(
        &self,
        call: &ToolCall,
        cancel: &CancellationSignal,
    ) -> Result<ToolResult, ToolError> {
        let tool = self.tools.get(&call.name).ok_or_else(|| {
            warn!(tool = %call.name, "Model requested an unknown tool");
            ToolError::permanent(format!("Unknown tool: {}", call.name))
        })?;

        let content = tool.invoke(call.arguments.clone(), cancel).await?;
        Ok(ToolResult::success(&call.id, content))
    }

    /// Number of registered tools.
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
