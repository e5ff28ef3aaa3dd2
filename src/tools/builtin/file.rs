//! File tools for reading and saving files in a conversation workspace.
//!
//! Paths are always relative to the workspace and are resolved through
//! [`ToolContext::resolve_path`]; these tools never build paths on their own.

use std::time::Instant;

use async_trait::async_trait;
use tokio::fs;

use crate::tools::tool::{
    ParameterType, Tool, ToolContext, ToolError, ToolOutput, ToolParameter, require_str,
};

/// Maximum file size for reading (1MB).
const MAX_READ_SIZE: u64 = 1024 * 1024;

/// Maximum file size for writing (5MB).
const MAX_WRITE_SIZE: usize = 5 * 1024 * 1024;

/// Read file contents tool.
#[derive(Debug)]
pub struct ReadFileTool {
    params: Vec<ToolParameter>,
}

impl ReadFileTool {
    pub fn new() -> Self {
        Self {
            params: vec![ToolParameter::required(
                "path",
                ParameterType::String,
                "Path to the file to read, relative to the conversation workspace",
            )],
        }
    }
}

impl Default for ReadFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file in the conversation workspace."
    }

    fn parameters(&self) -> &[ToolParameter] {
        &self.params
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let path_str = require_str(&input, "path")?;
        let path = ctx.resolve_path(path_str).await?;

        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::NotFound(path_str.to_string()));
            }
            Err(e) => {
                return Err(ToolError::ExecutionFailed(format!(
                    "Cannot access file: {}",
                    e
                )));
            }
        };

        if !metadata.is_file() {
            return Err(ToolError::InvalidTarget(path_str.to_string()));
        }

        if metadata.len() > MAX_READ_SIZE {
            return Err(ToolError::ExecutionFailed(format!(
                "File too large ({} bytes). Maximum is {} bytes.",
                metadata.len(),
                MAX_READ_SIZE
            )));
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Failed to read file: {}", e)))?;

        Ok(ToolOutput::text(content, start.elapsed()))
    }
}

/// Save file contents tool.
#[derive(Debug)]
pub struct SaveFileTool {
    params: Vec<ToolParameter>,
}

impl SaveFileTool {
    pub fn new() -> Self {
        Self {
            params: vec![
                ToolParameter::required(
                    "path",
                    ParameterType::String,
                    "Path to save the file to, relative to the conversation workspace",
                ),
                ToolParameter::required(
                    "content",
                    ParameterType::String,
                    "Content to write to the file",
                ),
            ],
        }
    }
}

impl Default for SaveFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SaveFileTool {
    fn name(&self) -> &str {
        "save_file"
    }

    fn description(&self) -> &str {
        "Save a file to the conversation workspace. Overwrites the file if it \
         exists and creates parent directories as needed."
    }

    fn parameters(&self) -> &[ToolParameter] {
        &self.params
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let path_str = require_str(&input, "path")?;
        let content = require_str(&input, "content")?;

        if content.len() > MAX_WRITE_SIZE {
            return Err(ToolError::ExecutionFailed(format!(
                "Content too large ({} bytes). Maximum is {} bytes.",
                content.len(),
                MAX_WRITE_SIZE
            )));
        }

        // Containment is checked before any directory is created.
        let path = ctx.resolve_path(path_str).await?;

        if fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
            return Err(ToolError::InvalidTarget(path_str.to_string()));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                ToolError::ExecutionFailed(format!("Failed to create directories: {}", e))
            })?;
        }

        fs::write(&path, content)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Failed to write file: {}", e)))?;

        Ok(ToolOutput::text(
            format!("File saved successfully: {}", path_str),
            start.elapsed(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::agent::ConversationId;
    use crate::workspace::WorkspaceManager;

    fn context() -> (TempDir, ToolContext) {
        let dir = TempDir::new().unwrap();
        let workspaces = Arc::new(WorkspaceManager::new(dir.path().join("runs")));
        (dir, ToolContext::new(ConversationId::new(), workspaces))
    }

    #[tokio::test]
    async fn test_save_then_read() {
        let (_dir, ctx) = context();

        let saved = SaveFileTool::new()
            .execute(
                &ctx,
                serde_json::json!({"path": "notes/x.txt", "content": "hello"}),
            )
            .await
            .unwrap();
        assert_eq!(
            saved.result,
            serde_json::json!("File saved successfully: notes/x.txt")
        );

        let read = ReadFileTool::new()
            .execute(&ctx, serde_json::json!({"path": "notes/x.txt"}))
            .await
            .unwrap();
        assert_eq!(read.result, serde_json::json!("hello"));
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let (_dir, ctx) = context();
        let tool = SaveFileTool::new();

        tool.execute(&ctx, serde_json::json!({"path": "a.txt", "content": "long content"}))
            .await
            .unwrap();
        tool.execute(&ctx, serde_json::json!({"path": "a.txt", "content": "short"}))
            .await
            .unwrap();

        let root = ctx.workspace_root().await.unwrap();
        assert_eq!(std::fs::read_to_string(root.join("a.txt")).unwrap(), "short");
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let (_dir, ctx) = context();
        let err = ReadFileTool::new()
            .execute(&ctx, serde_json::json!({"path": "missing.txt"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_read_directory_is_invalid_target() {
        let (_dir, ctx) = context();
        let root = ctx.workspace_root().await.unwrap();
        std::fs::create_dir_all(root.join("sub")).unwrap();

        let err = ReadFileTool::new()
            .execute(&ctx, serde_json::json!({"path": "sub"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidTarget(_)));

        let err = SaveFileTool::new()
            .execute(&ctx, serde_json::json!({"path": "sub", "content": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidTarget(_)));
    }

    #[tokio::test]
    async fn test_traversal_denied_for_read_and_save() {
        let (dir, ctx) = context();
        std::fs::write(dir.path().join("secret.txt"), "top secret").unwrap();

        for path in ["../../secret.txt", "../secret.txt", "/etc/passwd"] {
            let err = ReadFileTool::new()
                .execute(&ctx, serde_json::json!({"path": path}))
                .await
                .unwrap_err();
            assert!(matches!(err, ToolError::AccessDenied(_)), "read {path}: {err:?}");
        }

        let err = SaveFileTool::new()
            .execute(
                &ctx,
                serde_json::json!({"path": "../../etc/passwd", "content": "pwned"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::AccessDenied(_)));
        assert!(!dir.path().join("etc").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("secret.txt")).unwrap(),
            "top secret"
        );
    }
}
