//! Provider that replays queued replies, for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::llm::provider::{LlmProvider, ModelReply, ToolCompletionRequest};

const PROVIDER: &str = "scripted";

/// Replays replies in order and records every request it receives.
///
/// An exhausted script answers with `RequestFailed`, which exercises the
/// fallback path.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ModelReply, LlmError>>>,
    requests: Mutex<Vec<ToolCompletionRequest>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply.
    pub fn with_reply(self, reply: ModelReply) -> Self {
        self.push(Ok(reply));
        self
    }

    /// Queue a failure.
    pub fn with_error(self, error: LlmError) -> Self {
        self.push(Err(error));
        self
    }

    /// Wait this long before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, reply: Result<ModelReply, LlmError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(reply);
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ToolCompletionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn model_name(&self) -> &str {
        PROVIDER
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ModelReply, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or_else(|| {
            Err(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: "script exhausted".to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Message;

    #[tokio::test]
    async fn test_replays_in_order_then_fails() {
        let provider = ScriptedProvider::new()
            .with_reply(ModelReply::text("one"))
            .with_reply(ModelReply::text("two"));
        let request = || ToolCompletionRequest::new(vec![Message::user("hi")], vec![]);

        assert_eq!(
            provider.complete_with_tools(request()).await.unwrap(),
            ModelReply::text("one")
        );
        assert_eq!(
            provider.complete_with_tools(request()).await.unwrap(),
            ModelReply::text("two")
        );
        assert!(provider.complete_with_tools(request()).await.is_err());
        assert_eq!(provider.request_count(), 3);
    }
}
