//! LLM integration.
//!
//! The orchestrator only sees [`LlmProvider`]: history and tool definitions
//! in, an ordered [`ModelReply`] out. Vendor wire formats stay in the
//! provider modules.

mod anthropic;
mod provider;
mod scripted;

pub use anthropic::AnthropicProvider;
pub use provider::{
    LlmProvider, ModelReply, ReplyBlock, ToolCompletionRequest, ToolUseRequest,
};
pub use scripted::ScriptedProvider;

use std::sync::Arc;

use crate::config::AnthropicConfig;

/// Create the LLM provider from configuration.
pub fn create_llm_provider(config: &AnthropicConfig) -> Arc<dyn LlmProvider> {
    tracing::info!(model = %config.model, base_url = %config.base_url, "Using Anthropic Messages API");
    Arc::new(AnthropicProvider::new(config.clone()))
}
