//! Anthropic Messages API provider implementation.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::agent::{ContentBlock, Message, MessageContent, Role};
use crate::config::AnthropicConfig;
use crate::error::LlmError;
use crate::llm::provider::{
    LlmProvider, ModelReply, ReplyBlock, ToolCompletionRequest, ToolUseRequest,
};

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API provider.
pub struct AnthropicProvider {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    /// Create a new provider.
    ///
    /// A missing API key is not an error here; every request then fails with
    /// `AuthFailed` and the orchestrator falls back.
    pub fn new(config: AnthropicConfig) -> Self {
        if config.api_key.is_none() {
            tracing::warn!("ANTHROPIC_API_KEY is not set, replies will use the fallback");
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, config }
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Send a request to the messages API.
    async fn send_request<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        body: &T,
    ) -> Result<R, LlmError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| LlmError::AuthFailed {
                provider: PROVIDER.to_string(),
            })?;
        let url = self.api_url("messages");

        tracing::debug!("Sending request to Anthropic: {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(std::time::Duration::from_secs);
        let response_text = response.text().await.unwrap_or_default();

        tracing::debug!("Anthropic response status: {}", status);

        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => LlmError::AuthFailed {
                    provider: PROVIDER.to_string(),
                },
                429 => LlmError::RateLimited {
                    provider: PROVIDER.to_string(),
                    retry_after,
                },
                _ => LlmError::RequestFailed {
                    provider: PROVIDER.to_string(),
                    reason: format!("HTTP {}: {}", status, response_text),
                },
            });
        }

        serde_json::from_str(&response_text).map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: format!("JSON parse error: {}. Raw: {}", e, response_text),
        })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete_with_tools(
        &self,
        req: ToolCompletionRequest,
    ) -> Result<ModelReply, LlmError> {
        let tools: Vec<AnthropicTool> = req
            .tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema(),
            })
            .collect();

        let request = AnthropicRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            messages: to_wire_messages(&req.messages),
            tools: if tools.is_empty() { None } else { Some(tools) },
        };

        let response: AnthropicResponse = self.send_request(&request).await?;
        tracing::debug!(
            stop_reason = response.stop_reason.as_deref().unwrap_or(""),
            blocks = response.content.len(),
            "Anthropic reply received"
        );

        Ok(from_wire_reply(response))
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct AnthropicMessage {
    role: Role,
    content: Vec<WireContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireContent {
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
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ResponseContent>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContent {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

/// Convert history to the wire form.
///
/// The API requires alternating roles, so adjacent same-role messages (a run
/// of tool results, for instance) are folded into one. Empty text blocks are
/// dropped since the API rejects them.
fn to_wire_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
    let mut wire: Vec<AnthropicMessage> = Vec::with_capacity(messages.len());

    for message in messages {
        let content: Vec<WireContent> = match &message.content {
            MessageContent::Text(text) => vec![WireContent::Text { text: text.clone() }],
            MessageContent::Blocks(blocks) => blocks.iter().map(to_wire_block).collect(),
        }
        .into_iter()
        .filter(|block| !matches!(block, WireContent::Text { text } if text.is_empty()))
        .collect();

        if content.is_empty() {
            continue;
        }

        match wire.last_mut() {
            Some(last) if last.role == message.role => last.content.extend(content),
            _ => wire.push(AnthropicMessage {
                role: message.role,
                content,
            }),
        }
    }

    wire
}

fn to_wire_block(block: &ContentBlock) -> WireContent {
    match block {
        ContentBlock::Text { text } => WireContent::Text { text: text.clone() },
        ContentBlock::ToolUse { id, name, input } => WireContent::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => WireContent::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: match content {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            is_error: *is_error,
        },
    }
}

fn from_wire_reply(response: AnthropicResponse) -> ModelReply {
    let blocks = response
        .content
        .into_iter()
        .filter_map(|content| match content {
            ResponseContent::Text { text } => Some(ReplyBlock::Text(text)),
            ResponseContent::ToolUse { id, name, input } => {
                Some(ReplyBlock::ToolUse(ToolUseRequest { id, name, input }))
            }
            ResponseContent::Other => None,
        })
        .collect();
    ModelReply::new(blocks)
}
