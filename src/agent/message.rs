//! Conversation messages and tool-call records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tools::ToolDefinition;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One block of structured message content.
///
/// Blocks keep their position, so text interleaved with tool use survives a
/// round trip through the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
}

/// Message content: plain text or a list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// An immutable entry in a conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Assistant message recording text and tool-use intent in reply order.
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Synthetic user-role message carrying one tool result.
    pub fn tool_result(result: &ToolResult) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: result.tool_call_id.clone(),
                content: result.payload(),
                is_error: result.is_error(),
            }]),
        }
    }

    /// Whether this message is a raw text turn (as opposed to block content).
    pub fn is_raw_text(&self) -> bool {
        matches!(self.content, MessageContent::Text(_))
    }

    /// The concatenated text of the message, ignoring tool blocks.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A raw role-tagged text turn supplied by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingTurn {
    pub role: Role,
    pub content: String,
}

impl IncomingTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Merge consecutive same-role turns of one request into single turns.
pub fn merge_turns(turns: Vec<IncomingTurn>) -> Vec<IncomingTurn> {
    let mut merged: Vec<IncomingTurn> = Vec::with_capacity(turns.len());
    for turn in turns {
        match merged.last_mut() {
            Some(last) if last.role == turn.role => {
                last.content.push_str("\n\n");
                last.content.push_str(&turn.content);
            }
            _ => merged.push(turn),
        }
    }
    merged
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque id assigned by the model provider.
    pub id: String,
    /// Tool name as requested by the model.
    pub name: String,
    /// Registered definition, absent when the model named an unknown tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolDefinition>,
    pub input: serde_json::Value,
}

/// A tool call awaiting its result.
#[derive(Debug, Clone)]
pub struct PendingToolCall {
    pub call: ToolCall,
    pub recorded_at: DateTime<Utc>,
    /// Claimed by a server-side execution that has not submitted yet.
    pub executing: bool,
}

/// Result submitted for a pending tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    /// Forwarded to the model verbatim.
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result,
            error: None,
        }
    }

    pub fn failure(tool_call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Payload handed to the model: the result, or the error text when the
    /// caller sent no result.
    pub fn payload(&self) -> serde_json::Value {
        match (&self.result, &self.error) {
            (serde_json::Value::Null, Some(error)) => serde_json::Value::String(error.clone()),
            (result, _) => result.clone(),
        }
    }
}
