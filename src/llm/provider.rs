//! LLM provider trait and reply types.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::Message;
use crate::error::LlmError;
use crate::tools::ToolDefinition;

/// Request for a completion with tools available.
#[derive(Debug, Clone)]
pub struct ToolCompletionRequest {
    /// Full conversation history, oldest first.
    pub messages: Vec<Message>,
    /// Tools the model may call.
    pub tools: Vec<ToolDefinition>,
}

impl ToolCompletionRequest {
    pub fn new(messages: Vec<Message>, tools: Vec<ToolDefinition>) -> Self {
        Self { messages, tools }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseRequest {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// One positional block of a model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBlock {
    Text(String),
    ToolUse(ToolUseRequest),
}

/// A model reply, blocks in the order the model produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub blocks: Vec<ReplyBlock>,
}

impl ModelReply {
    pub fn new(blocks: Vec<ReplyBlock>) -> Self {
        Self { blocks }
    }

    /// A reply holding a single text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            blocks: vec![ReplyBlock::Text(text.into())],
        }
    }

    pub fn text_segments(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|block| match block {
            ReplyBlock::Text(text) => Some(text.as_str()),
            ReplyBlock::ToolUse(_) => None,
        })
    }

    pub fn tool_uses(&self) -> impl Iterator<Item = &ToolUseRequest> {
        self.blocks.iter().filter_map(|block| match block {
            ReplyBlock::ToolUse(tool_use) => Some(tool_use),
            ReplyBlock::Text(_) => None,
        })
    }

    /// Visible assistant text: all text segments, concatenated.
    pub fn joined_text(&self) -> String {
        self.text_segments().collect::<Vec<_>>().join("")
    }

    pub fn has_tool_uses(&self) -> bool {
        self.tool_uses().next().is_some()
    }

    /// Reject replies the orchestrator cannot act on.
    pub fn validate(&self, provider: &str) -> Result<(), LlmError> {
        if self.blocks.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: provider.to_string(),
                reason: "Reply has no content".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for tool_use in self.tool_uses() {
            if tool_use.id.is_empty() || !seen.insert(tool_use.id.as_str()) {
                return Err(LlmError::InvalidResponse {
                    provider: provider.to_string(),
                    reason: format!("Missing or duplicate tool-use id '{}'", tool_use.id),
                });
            }
        }
        Ok(())
    }
}

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the model name.
    fn model_name(&self) -> &str;

    /// Send the history and tool definitions, parse the reply.
    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ModelReply, LlmError>;
}
