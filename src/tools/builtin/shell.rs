//! Shell execution tool for running commands inside a conversation workspace.
//!
//! Provides controlled command execution with:
//! - Working directory pinned to the workspace
//! - Timeout enforcement with the child's whole process group killed on expiry
//! - Output capture and truncation
//! - Blocked command patterns, checked before anything is spawned
//!
//! Every command that passes the blocklist is recorded in the workspace
//! transcript, whatever its outcome.

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use aho_corasick::AhoCorasick;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::process::{spawn_grouped, wait_or_kill};
use crate::tools::tool::{
    ParameterType, Tool, ToolContext, ToolError, ToolOutput, ToolParameter, require_str,
};

/// Maximum output size per stream before truncation (64KB).
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Default command timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Hard ceiling for caller-supplied timeouts.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(300);

/// Transcript file in the workspace root.
pub const TRANSCRIPT_FILE: &str = "command_output.txt";

/// Exit code reported for commands that timed out or never started.
const SYNTHETIC_EXIT_CODE: i32 = -1;

/// Substrings that are always blocked.
const BLOCKED_PATTERNS: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "sudo ",
    "doas ",
    "mkfs",
    "dd if=",
    "of=/dev/",
    "> /dev/sd",
    "> /dev/nvme",
    "> /etc/",
    "shutdown",
    "reboot",
    "poweroff",
    "mv /*",
    "chmod -r 777 /",
    ":(){", // Fork bomb
];

static BLOCKLIST: LazyLock<Option<AhoCorasick>> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(BLOCKED_PATTERNS)
        .map_err(|e| tracing::error!("Failed to build command blocklist: {}", e))
        .ok()
});

/// Return the first blocked pattern contained in `cmd`.
///
/// If the matcher cannot be built every command is treated as blocked.
pub fn blocked_pattern(cmd: &str) -> Option<&'static str> {
    match BLOCKLIST.as_ref() {
        Some(matcher) => matcher
            .find(cmd)
            .map(|m| BLOCKED_PATTERNS[m.pattern().as_usize()]),
        None => Some("<blocklist unavailable>"),
    }
}

/// Shell command execution tool.
#[derive(Debug)]
pub struct RunCommandTool {
    params: Vec<ToolParameter>,
    /// Timeout when the caller does not ask for one.
    default_timeout: Duration,
    /// Upper bound for any timeout.
    max_timeout: Duration,
}

impl RunCommandTool {
    /// Create a new command tool with default settings.
    pub fn new() -> Self {
        Self {
            params: vec![
                ToolParameter::required("command", ParameterType::String, "Command to run"),
                ToolParameter::optional(
                    "timeout",
                    ParameterType::Integer,
                    "Maximum execution time in seconds (default: 30)",
                ),
            ],
            default_timeout: DEFAULT_TIMEOUT,
            max_timeout: MAX_TIMEOUT,
        }
    }

    /// Set the timeout used when the caller gives none.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the hard timeout ceiling.
    pub fn with_max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = timeout;
        self
    }

    fn effective_timeout(&self, requested_secs: Option<u64>) -> Duration {
        requested_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout)
    }

    /// Run `cmd` under `sh -c` in `workdir`.
    ///
    /// Never fails: spawn errors and timeouts come back as a synthetic
    /// outcome with exit code -1.
    async fn run(&self, cmd: &str, workdir: &std::path::Path, timeout: Duration) -> CommandOutcome {
        let mut command = Command::new("sh");
        command
            .args(["-c", cmd])
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = match spawn_grouped(&mut command) {
            Ok(child) => child,
            Err(e) => return CommandOutcome::synthetic(format!("Error: {}", e)),
        };

        match wait_or_kill(child, timeout).await {
            Ok(Ok(output)) => CommandOutcome {
                exit_code: output.status.code().unwrap_or(SYNTHETIC_EXIT_CODE),
                stdout: truncate_output(&String::from_utf8_lossy(&output.stdout)),
                stderr: truncate_output(&String::from_utf8_lossy(&output.stderr)),
            },
            Ok(Err(e)) => CommandOutcome::synthetic(format!("Error: {}", e)),
            Err(_) => CommandOutcome::synthetic(format!(
                "Command timed out after {} seconds",
                timeout.as_secs_f64()
            )),
        }
    }
}

impl Default for RunCommandTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct CommandOutcome {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

impl CommandOutcome {
    fn synthetic(stderr: String) -> Self {
        Self {
            exit_code: SYNTHETIC_EXIT_CODE,
            stdout: String::new(),
            stderr,
        }
    }

    fn transcript_entry(&self, cmd: &str) -> String {
        format!(
            "\n--- Command: {} ---\nExit Code: {}\n--- STDOUT ---\n{}\n--- STDERR ---\n{}\n",
            cmd, self.exit_code, self.stdout, self.stderr
        )
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a terminal command in the conversation workspace. Returns the exit code, \
         stdout and stderr. Commands that run past their timeout are killed."
    }

    fn parameters(&self) -> &[ToolParameter] {
        &self.params
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let cmd = require_str(&input, "command")?;

        if let Some(pattern) = blocked_pattern(cmd) {
            tracing::warn!(
                conversation_id = %ctx.conversation_id,
                pattern,
                command = %truncate_for_log(cmd),
                "Blocked forbidden command"
            );
            return Err(ToolError::ForbiddenCommand {
                pattern: pattern.to_string(),
            });
        }

        let timeout = self.effective_timeout(input.get("timeout").and_then(|v| v.as_u64()));
        let workdir = ctx.workspace_root().await?;

        let start = Instant::now();
        let outcome = self.run(cmd, &workdir, timeout).await;
        let duration = start.elapsed();

        tracing::debug!(
            conversation_id = %ctx.conversation_id,
            exit_code = outcome.exit_code,
            duration_ms = duration.as_millis() as u64,
            "Command finished"
        );

        if let Err(e) = append_transcript(ctx, &outcome.transcript_entry(cmd)).await {
            tracing::warn!(
                conversation_id = %ctx.conversation_id,
                error = %e,
                "Failed to append command transcript"
            );
        }

        let result = serde_json::json!({
            "exit_code": outcome.exit_code,
            "stdout": outcome.stdout,
            "stderr": outcome.stderr,
        });

        Ok(ToolOutput::success(result, duration))
    }
}

async fn append_transcript(ctx: &ToolContext, entry: &str) -> Result<(), ToolError> {
    let path = ctx.resolve_path(TRANSCRIPT_FILE).await?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    file.write_all(entry.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Largest index `<= index` that falls on a char boundary.
fn floor_boundary(s: &str, mut index: usize) -> usize {
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Truncate output to fit within limits, keeping head and tail.
fn truncate_output(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_SIZE {
        return s.to_string();
    }
    let half = MAX_OUTPUT_SIZE / 2;
    let head = floor_boundary(s, half);
    let tail = floor_boundary(s, s.len() - half);
    format!(
        "{}\n\n... [truncated {} bytes] ...\n\n{}",
        &s[..head],
        tail - head,
        &s[tail..]
    )
}

/// Truncate command for log lines (char-aware to avoid UTF-8 boundary panics).
fn truncate_for_log(s: &str) -> String {
    if s.chars().count() <= 100 {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(100).collect::<String>())
    }
}
