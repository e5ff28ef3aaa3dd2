//! Web search and content extraction tools.
//!
//! Both delegate to an out-of-process helper program and save what it prints
//! into the conversation workspace before returning it.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use super::process::{spawn_grouped, wait_or_kill};
use crate::tools::tool::{
    ParameterType, Tool, ToolContext, ToolError, ToolOutput, ToolParameter, require_str,
};

/// Default helper timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Results requested when the caller gives no usable count.
const DEFAULT_MAX_RESULTS: u64 = 10;

/// Longest slug used in saved file names.
const MAX_SLUG_LEN: usize = 30;

/// A helper program plus its leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperCommand {
    program: String,
    args: Vec<String>,
}

impl HelperCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Parse a whitespace-separated command line such as
    /// `python3 tools/search_engine.py`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self {
            program: program.to_string(),
            args: parts.map(String::from).collect(),
        })
    }

    /// Run the helper with `extra` appended, returning trimmed stdout.
    async fn run(&self, extra: &[&str], timeout: Duration) -> Result<String, ToolError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .args(extra)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = spawn_grouped(&mut command).map_err(|e| {
            ToolError::ExecutionFailed(format!("Failed to spawn helper '{}': {}", self.program, e))
        })?;

        let output = wait_or_kill(child, timeout)
            .await
            .map_err(|_| ToolError::Timeout(timeout))?
            .map_err(|e| ToolError::ExecutionFailed(format!("Helper failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::ExecutionFailed(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Keep ASCII alphanumerics, map everything else to `_`, cap the length.
fn slug(text: &str) -> String {
    text.chars()
        .take(MAX_SLUG_LEN)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

async fn save_output(
    ctx: &ToolContext,
    file_name: &str,
    header: &str,
    body: &str,
) -> Result<(), ToolError> {
    let path = ctx.resolve_path(file_name).await?;
    tokio::fs::write(&path, format!("{}\n\n{}", header, body)).await?;
    tracing::debug!(
        conversation_id = %ctx.conversation_id,
        file = file_name,
        "Saved helper output"
    );
    Ok(())
}

/// Web search tool.
#[derive(Debug)]
pub struct WebSearchTool {
    params: Vec<ToolParameter>,
    helper: HelperCommand,
    timeout: Duration,
}

impl WebSearchTool {
    pub fn new(helper: HelperCommand) -> Self {
        Self {
            params: vec![
                ToolParameter::required(
                    "query",
                    ParameterType::String,
                    "The search query to look up on the web",
                ),
                ToolParameter::optional(
                    "max_results",
                    ParameterType::Integer,
                    "Maximum number of results to return (default: 10)",
                ),
            ],
            helper,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the helper timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information using DuckDuckGo."
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
        let query = require_str(&input, "query")?;
        let max_results = input
            .get("max_results")
            .and_then(|v| v.as_u64())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .to_string();

        let results = self
            .helper
            .run(&[query, "--max-results", &max_results], self.timeout)
            .await?;

        save_output(
            ctx,
            &format!("search_results_{}.txt", slug(query)),
            &format!("Search Query: {}", query),
            &results,
        )
        .await?;

        Ok(ToolOutput::text(results, start.elapsed()))
    }
}

/// Web page content extraction tool.
#[derive(Debug)]
pub struct ExtractContentTool {
    params: Vec<ToolParameter>,
    helper: HelperCommand,
    timeout: Duration,
}

impl ExtractContentTool {
    pub fn new(helper: HelperCommand) -> Self {
        Self {
            params: vec![ToolParameter::required(
                "url",
                ParameterType::String,
                "URL of the web page to extract content from",
            )],
            helper,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the helper timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Tool for ExtractContentTool {
    fn name(&self) -> &str {
        "extract_content"
    }

    fn description(&self) -> &str {
        "Extract and parse content from a website URL."
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
        let url = require_str(&input, "url")?;
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| ToolError::ExecutionFailed(format!("Invalid URL '{}': {}", url, e)))?;
        let domain = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => "unknown".to_string(),
        };

        let content = self.helper.run(&[url], self.timeout).await?;

        save_output(
            ctx,
            &format!("extracted_content_{}.txt", slug(&domain)),
            &format!("Extracted from URL: {}", url),
            &content,
        )
        .await?;

        Ok(ToolOutput::text(content, start.elapsed()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::agent::ConversationId;
    use crate::workspace::WorkspaceManager;

    fn context() -> (TempDir, ToolContext) {
        let dir = TempDir::new().unwrap();
        let workspaces = Arc::new(WorkspaceManager::new(dir.path().join("runs")));
        (dir, ToolContext::new(ConversationId::new(), workspaces))
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("rust async/await?"), "rust_async_await_");
        assert_eq!(slug("example.com"), "example_com");
        assert_eq!(slug(&"a".repeat(50)).len(), MAX_SLUG_LEN);
        assert_eq!(slug("../../etc"), "______etc");
    }

    #[test]
    fn test_helper_parse() {
        assert_eq!(
            HelperCommand::parse("python3 tools/search_engine.py"),
            Some(HelperCommand::new("python3").arg("tools/search_engine.py"))
        );
        assert_eq!(HelperCommand::parse("   "), None);
    }

    #[tokio::test]
    async fn test_search_saves_results() {
        let (_dir, ctx) = context();
        let tool = WebSearchTool::new(HelperCommand::new("echo"));

        let output = tool
            .execute(&ctx, serde_json::json!({"query": "hello world", "max_results": 0}))
            .await
            .unwrap();

        assert_eq!(
            output.result,
            serde_json::json!("hello world --max-results 10")
        );
        let root = ctx.workspace_root().await.unwrap();
        let saved = std::fs::read_to_string(root.join("search_results_hello_world.txt")).unwrap();
        assert_eq!(
            saved,
            "Search Query: hello world\n\nhello world --max-results 10"
        );
    }

    #[tokio::test]
    async fn test_extract_saves_by_domain() {
        let (_dir, ctx) = context();
        let tool = ExtractContentTool::new(HelperCommand::new("echo"));

        let output = tool
            .execute(&ctx, serde_json::json!({"url": "https://example.com/page?q=1"}))
            .await
            .unwrap();

        assert_eq!(output.result, serde_json::json!("https://example.com/page?q=1"));
        let root = ctx.workspace_root().await.unwrap();
        let saved = std::fs::read_to_string(root.join("extracted_content_example_com.txt")).unwrap();
        assert!(saved.starts_with("Extracted from URL: https://example.com/page?q=1\n\n"));
    }

    #[tokio::test]
    async fn test_helper_failure_is_execution_failure() {
        let (_dir, ctx) = context();
        let tool = WebSearchTool::new(
            HelperCommand::new("sh")
                .arg("-c")
                .arg("echo 'no network' >&2; exit 2"),
        );

        let err = tool
            .execute(&ctx, serde_json::json!({"query": "anything"}))
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::ExecutionFailed(ref msg) if msg == "no network"));
        let root = ctx.workspace_root().await.unwrap();
        assert!(!root.join("search_results_anything.txt").exists());
    }

    #[tokio::test]
    async fn test_helper_timeout() {
        let (_dir, ctx) = context();
        let tool = ExtractContentTool::new(HelperCommand::new("sh").arg("-c").arg("sleep 5"))
            .with_timeout(Duration::from_millis(100));

        let err = tool
            .execute(&ctx, serde_json::json!({"url": "https://example.com"}))
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_helper_timeout_kills_background_jobs() {
        let (dir, ctx) = context();
        let marker = dir.path().join("late.txt");
        let tool = WebSearchTool::new(
            HelperCommand::new("sh")
                .arg("-c")
                .arg(format!("(sleep 1; touch {}) & sleep 10", marker.display())),
        )
        .with_timeout(Duration::from_millis(200));

        let err = tool
            .execute(&ctx, serde_json::json!({"query": "slow"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));

        tokio::time::sleep(Duration::from_millis(1800)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let (_dir, ctx) = context();
        let tool = ExtractContentTool::new(HelperCommand::new("echo"));

        let err = tool
            .execute(&ctx, serde_json::json!({"url": "not a url"}))
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }
}
