//! Tool registry for managing available tools.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::ToolsConfig;
use crate::tools::builtin::{
    ExtractContentTool, ReadFileTool, RunCommandTool, SaveFileTool, WebSearchTool,
};
use crate::tools::tool::{Tool, ToolContext, ToolDefinition, ToolError, ToolOutput};

/// Registry of available tools, keyed by name.
///
/// Registration order is discovery order; a later registration under an
/// existing name replaces the earlier tool in place.
pub struct ToolRegistry {
    tools: RwLock<Vec<Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(Vec::new()),
        }
    }

    /// Register a tool, shadowing any tool with the same name.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().await;
        match tools.iter().position(|t| t.name() == name) {
            Some(index) => {
                tools[index] = tool;
                tracing::info!(tool = %name, "Replaced registered tool");
            }
            None => {
                tools.push(tool);
                tracing::info!(tool = %name, "Registered tool");
            }
        }
    }

    /// Get a tool by name.
    pub async fn get(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.tools
            .read()
            .await
            .iter()
            .find(|t| t.name() == name)
            .cloned()
            .ok_or_else(|| ToolError::ToolNotFound(name.to_string()))
    }

    /// All tools in registration order.
    pub async fn list(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.read().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.tools.read().await.len()
    }

    /// Definitions for every registered tool, computed on each call.
    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .await
            .iter()
            .map(|t| t.definition())
            .collect()
    }

    /// Look up, validate and run a tool.
    pub async fn execute(
        &self,
        ctx: &ToolContext,
        name: &str,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.get(name).await?;
        tool.validate_input(&input)?;

        tracing::debug!(
            conversation_id = %ctx.conversation_id,
            tool = name,
            "Executing tool"
        );
        let output = tool.execute(ctx, input).await;

        match &output {
            Ok(output) => tracing::debug!(
                conversation_id = %ctx.conversation_id,
                tool = name,
                duration_ms = output.duration.as_millis() as u64,
                "Tool finished"
            ),
            Err(e) => tracing::debug!(
                conversation_id = %ctx.conversation_id,
                tool = name,
                error = %e,
                "Tool failed"
            ),
        }
        output
    }

    /// Register the builtin file, command and web tools.
    pub async fn register_builtin_tools(&self, config: &ToolsConfig) {
        self.register(Arc::new(ReadFileTool::new())).await;
        self.register(Arc::new(SaveFileTool::new())).await;
        self.register(Arc::new(
            RunCommandTool::new()
                .with_default_timeout(config.command_timeout)
                .with_max_timeout(config.command_max_timeout),
        ))
        .await;
        self.register(Arc::new(
            WebSearchTool::new(config.search_helper.clone()).with_timeout(config.helper_timeout),
        ))
        .await;
        self.register(Arc::new(
            ExtractContentTool::new(config.extract_helper.clone())
                .with_timeout(config.helper_timeout),
        ))
        .await;
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
