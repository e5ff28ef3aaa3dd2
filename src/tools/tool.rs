//! Tool trait and types.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::ConversationId;
use crate::workspace::{WorkspaceError, WorkspaceManager};

/// Error type for tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Missing required parameter: {field}")]
    Validation { field: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Not a file: {0}")]
    InvalidTarget(String),

    #[error("Forbidden command: contains '{pattern}'")]
    ForbiddenCommand { pattern: String },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::ExecutionFailed(err.to_string())
    }
}

impl From<WorkspaceError> for ToolError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::AccessDenied { path, .. } => ToolError::AccessDenied(path),
            WorkspaceError::Io(e) => ToolError::ExecutionFailed(e.to_string()),
        }
    }
}

/// Output from a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// The result data.
    pub result: serde_json::Value,
    /// Time taken.
    pub duration: Duration,
}

impl ToolOutput {
    /// Create a successful output with a JSON result.
    pub fn success(result: serde_json::Value, duration: Duration) -> Self {
        Self { result, duration }
    }

    /// Create a text output.
    pub fn text(text: impl Into<String>, duration: Duration) -> Self {
        Self {
            result: serde_json::Value::String(text.into()),
            duration,
        }
    }
}

/// Primitive type tag of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

/// One declared tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub description: String,
    pub required: bool,
    #[serde(rename = "type")]
    pub kind: ParameterType,
}

impl ToolParameter {
    pub fn required(
        name: impl Into<String>,
        kind: ParameterType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
            kind,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        kind: ParameterType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// The advertise-to-model form of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolDefinition {
    /// JSON Schema object for the parameter list.
    pub fn input_schema(&self) -> serde_json::Value {
        let properties: serde_json::Map<String, serde_json::Value> = self
            .parameters
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    serde_json::json!({
                        "type": p.kind,
                        "description": p.description,
                    }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// What a tool may touch while running for a conversation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub conversation_id: ConversationId,
    workspaces: Arc<WorkspaceManager>,
}

impl ToolContext {
    pub fn new(conversation_id: ConversationId, workspaces: Arc<WorkspaceManager>) -> Self {
        Self {
            conversation_id,
            workspaces,
        }
    }

    /// Resolve a workspace-relative path; see [`WorkspaceManager::resolve`].
    pub async fn resolve_path(&self, relative: &str) -> Result<PathBuf, ToolError> {
        Ok(self
            .workspaces
            .resolve(&self.conversation_id, relative)
            .await?)
    }

    /// The workspace directory, created if missing.
    pub async fn workspace_root(&self) -> Result<PathBuf, ToolError> {
        Ok(self.workspaces.ensure(&self.conversation_id).await?)
    }
}

/// Trait for tools that the model can use.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name.
    fn name(&self) -> &str;

    /// Get a description of what the tool does.
    fn description(&self) -> &str;

    /// Declared parameters, fixed at construction.
    fn parameters(&self) -> &[ToolParameter];

    /// Check that every required parameter is present.
    ///
    /// Values are not type-checked here; tools read what they need and fail
    /// during execution if a value is unusable.
    fn validate_input(&self, input: &serde_json::Value) -> Result<(), ToolError> {
        for param in self.parameters().iter().filter(|p| p.required) {
            let present = input
                .get(&param.name)
                .is_some_and(|value| !value.is_null());
            if !present {
                return Err(ToolError::Validation {
                    field: param.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Execute the tool for one conversation.
    async fn execute(
        &self,
        ctx: &ToolContext,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError>;

    /// Get the definition advertised to the model.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().to_vec(),
        }
    }
}

/// Read a required string parameter.
pub(crate) fn require_str<'a>(
    input: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str, ToolError> {
    input
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::Validation {
            field: field.to_string(),
        })
}

/// A simple tool for testing.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct EchoTool {
    params: Vec<ToolParameter>,
}

#[cfg(test)]
impl EchoTool {
    pub(crate) fn new() -> Self {
        Self {
            params: vec![ToolParameter::required(
                "message",
                ParameterType::String,
                "The message to echo back",
            )],
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the input message. Useful for testing."
    }

    fn parameters(&self) -> &[ToolParameter] {
        &self.params
    }

    async fn execute(
        &self,
        _ctx: &ToolContext,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let message = require_str(&input, "message")?;
        Ok(ToolOutput::text(message, Duration::from_millis(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_validate_input_names_missing_field() {
        let tool = EchoTool::new();

        tool.validate_input(&serde_json::json!({"message": "hi"}))
            .unwrap();

        let err = tool.validate_input(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, ToolError::Validation { ref field } if field == "message"));

        let err = tool
            .validate_input(&serde_json::json!({"message": null}))
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation { .. }));
    }

    #[test]
    fn test_validate_input_does_not_type_check() {
        let tool = EchoTool::new();
        tool.validate_input(&serde_json::json!({"message": 42}))
            .unwrap();
    }

    #[test]
    fn test_input_schema() {
        let definition = ToolDefinition {
            name: "run_command".into(),
            description: "Run a command".into(),
            parameters: vec![
                ToolParameter::required("command", ParameterType::String, "Shell command"),
                ToolParameter::optional("timeout", ParameterType::Integer, "Seconds"),
            ],
        };

        assert_eq!(
            definition.input_schema(),
            serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Shell command"},
                    "timeout": {"type": "integer", "description": "Seconds"},
                },
                "required": ["command"],
            })
        );
    }

    #[tokio::test]
    async fn test_echo_tool() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = ToolContext::new(
            ConversationId::new(),
            Arc::new(WorkspaceManager::new(dir.path())),
        );

        let output = EchoTool::new()
            .execute(&ctx, serde_json::json!({"message": "hello"}))
            .await
            .unwrap();

        assert_eq!(output.result, serde_json::json!("hello"));
    }
}
