//! Error types for the relay.

use std::time::Duration;

use crate::agent::ConversationId;

/// Errors returned by the conversation API.
///
/// Gateway failures never surface here: they end in the fallback reply. Tool
/// failures travel back to the model as error-marked results.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Conversation error: {0}")]
    Conversation(#[from] ConversationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors. Every setting has a default, so only malformed
/// values are rejected.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Errors raised by an LLM provider.
///
/// None of these reach the end user: the orchestrator absorbs them into the
/// fallback reply.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rejected the credentials")]
    AuthFailed { provider: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} returned an invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} did not answer within {timeout:?}")]
    Timeout { provider: String, timeout: Duration },
}

/// Protocol misuse by the caller of the conversation API.
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("Conversation not found: {0}")]
    UnknownConversation(ConversationId),

    #[error("Tool call {tool_call_id} is not pending in conversation {conversation_id}")]
    UnknownToolCall {
        conversation_id: ConversationId,
        tool_call_id: String,
    },

    #[error("Conversation {0} has no pending tool calls")]
    NoPendingToolCalls(ConversationId),

    #[error("Tool calls of conversation {0} are already executing on the server")]
    ToolsExecuting(ConversationId),

    #[error("Tool call {0} appears more than once in the submission")]
    DuplicateToolResult(String),

    #[error("Conversation {conversation_id} is waiting for tool results: {}", pending.join(", "))]
    ToolResultsPending {
        conversation_id: ConversationId,
        pending: Vec<String>,
    },

    #[error("Request must contain messages and end with a user turn")]
    EmptyTurn,

    #[error("Submission contained no tool results")]
    EmptySubmission,

    #[error("Conversation {0} is busy, try again")]
    Busy(ConversationId),
}

pub type Result<T> = std::result::Result<T, Error>;
