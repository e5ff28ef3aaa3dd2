//! Orchestrator: drives conversations through the model/tool loop.
//!
//! ```text
//! user turn ──▶ append ──▶ AwaitingModelReply ──▶ gateway
//!                                ▲                   │
//!                                │         ┌─────────┴─────────┐
//!                                │     text only            tool uses
//!                                │         │                   │
//!                                │       Idle        AwaitingToolResults
//!                                │                             │
//!                                └──── all results submitted ──┘
//! ```
//!
//! Each step runs on its own task and holds the conversation lock only while
//! it touches conversation state. The lock is released for the gateway call,
//! so queries on the same conversation stay responsive; requests that need a
//! settled conversation wait for the reply to land. Gateway failures of any
//! kind end in the fallback reply and `Idle`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;

use crate::agent::conversation::{ConversationId, ConversationState};
use crate::agent::fallback::fallback_text;
use crate::agent::message::{
    ContentBlock, IncomingTurn, Message, Role, ToolCall, ToolResult, merge_turns,
};
use crate::agent::store::{ABANDONED_REASON, ConversationGuard, ConversationSnapshot, ConversationStore};
use crate::error::{ConversationError, Error, LlmError, Result};
use crate::llm::{LlmProvider, ModelReply, ReplyBlock, ToolCompletionRequest};
use crate::tools::{ToolContext, ToolError, ToolRegistry};
use crate::workspace::WorkspaceManager;

/// Orchestrator timing and limits.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on one gateway call.
    pub gateway_timeout: Duration,
    /// How long a request waits for an in-flight model call before `Busy`.
    pub settle_timeout: Duration,
    /// Server-side execute/continue rounds allowed per chat request.
    pub max_tool_rounds: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(120),
            settle_timeout: Duration::from_secs(150),
            max_tool_rounds: 8,
        }
    }
}

impl OrchestratorConfig {
    /// Set the gateway timeout; the settle timeout follows with some slack.
    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self.settle_timeout = timeout + Duration::from_secs(30);
        self
    }
}

/// Result of one orchestration step, as seen by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub conversation_id: ConversationId,
    pub state: ConversationState,
    /// Assistant message appended by this step, if any.
    pub message: Option<Message>,
    /// Tool calls the caller must answer, in request order.
    pub tool_calls: Vec<ToolCall>,
    /// Whether the assistant message is the fallback reply.
    pub fallback: bool,
}

impl TurnOutcome {
    pub fn awaiting_tool_results(&self) -> bool {
        self.state == ConversationState::AwaitingToolResults
    }
}

/// The conversation control loop.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<ConversationStore>,
    registry: Arc<ToolRegistry>,
    provider: Arc<dyn LlmProvider>,
    workspaces: Arc<WorkspaceManager>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<ConversationStore>,
        registry: Arc<ToolRegistry>,
        provider: Arc<dyn LlmProvider>,
        workspaces: Arc<WorkspaceManager>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            provider,
            workspaces,
            config,
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Start or continue a conversation with a batch of raw turns.
    ///
    /// An unknown or absent id starts a new conversation; the outcome carries
    /// the id to use from then on.
    pub async fn handle_user_turn(
        &self,
        conversation_id: Option<ConversationId>,
        turns: Vec<IncomingTurn>,
    ) -> Result<TurnOutcome> {
        let this = self.clone();
        spawn_step(async move { this.user_turn_step(conversation_id, turns).await }).await
    }

    /// Submit results for pending tool calls.
    ///
    /// The batch is validated as a whole before anything is recorded. The
    /// model is called again once no tool calls remain pending.
    pub async fn submit_tool_results(
        &self,
        conversation_id: &ConversationId,
        results: Vec<ToolResult>,
    ) -> Result<TurnOutcome> {
        let this = self.clone();
        let conversation_id = conversation_id.clone();
        spawn_step(async move {
            this.tool_results_step(conversation_id, results, Submitter::Client)
                .await
        })
        .await
    }

    /// Run every pending tool call server-side, then submit the results.
    ///
    /// The calls are claimed under the conversation lock before anything
    /// runs, so a concurrent execute request or a client submission for a
    /// claimed call fails with `ToolsExecuting` instead of running it again.
    /// Tools run concurrently without holding the lock. Tool failures become
    /// error-marked results so the model can react to them.
    pub async fn execute_pending_tools(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<TurnOutcome> {
        let this = self.clone();
        let conversation_id = conversation_id.clone();
        spawn_step(async move { this.execute_step(conversation_id).await }).await
    }

    /// Keep executing tools server-side until the model stops asking for
    /// them or `max_rounds` is reached.
    pub async fn run_tool_rounds(
        &self,
        mut outcome: TurnOutcome,
        max_rounds: usize,
    ) -> Result<TurnOutcome> {
        let mut rounds = 0;
        while outcome.awaiting_tool_results() && rounds < max_rounds {
            outcome = self.execute_pending_tools(&outcome.conversation_id).await?;
            rounds += 1;
        }
        if outcome.awaiting_tool_results() {
            tracing::info!(
                conversation_id = %outcome.conversation_id,
                rounds,
                "Tool round limit reached, returning pending calls to the caller"
            );
        }
        Ok(outcome)
    }

    /// Give up on every pending tool call of a conversation.
    pub async fn abandon_pending(&self, conversation_id: &ConversationId) -> Result<Vec<ToolCall>> {
        let mut guard = self
            .store
            .lock_settled(conversation_id, self.config.settle_timeout)
            .await?;
        if guard.pending_tool_calls().is_empty() {
            return Err(ConversationError::NoPendingToolCalls(conversation_id.clone()).into());
        }
        if guard.is_executing() {
            return Err(ConversationError::ToolsExecuting(conversation_id.clone()).into());
        }

        let abandoned = guard.abandon_pending(ABANDONED_REASON);
        guard.set_state(ConversationState::Idle);
        tracing::info!(
            conversation_id = %conversation_id,
            abandoned = abandoned.len(),
            "Pending tool calls abandoned by client"
        );
        Ok(abandoned)
    }

    pub async fn snapshot(&self, conversation_id: &ConversationId) -> Result<ConversationSnapshot> {
        Ok(self.store.snapshot(conversation_id).await?)
    }

    pub async fn history(&self, conversation_id: &ConversationId) -> Result<Vec<Message>> {
        Ok(self.store.history(conversation_id).await?)
    }

    async fn user_turn_step(
        &self,
        conversation_id: Option<ConversationId>,
        turns: Vec<IncomingTurn>,
    ) -> Result<TurnOutcome> {
        let turns = merge_turns(turns);
        if turns.last().is_none_or(|turn| turn.role != Role::User) {
            return Err(ConversationError::EmptyTurn.into());
        }

        let (conversation_id, _) = self.store.get_or_create(conversation_id.as_ref()).await;
        let mut guard = self
            .store
            .lock_settled(&conversation_id, self.config.settle_timeout)
            .await?;

        if guard.state() == ConversationState::AwaitingToolResults {
            return Err(ConversationError::ToolResultsPending {
                conversation_id,
                pending: guard.pending_ids(),
            }
            .into());
        }

        for turn in turns {
            guard.append_raw_turn(turn.role, turn.content);
        }

        self.call_model(guard).await
    }

    async fn execute_step(&self, conversation_id: ConversationId) -> Result<TurnOutcome> {
        let claimed = {
            let mut guard = self
                .store
                .lock_settled(&conversation_id, self.config.settle_timeout)
                .await?;
            if guard.state() != ConversationState::AwaitingToolResults
                || guard.pending_tool_calls().is_empty()
            {
                return Err(ConversationError::NoPendingToolCalls(conversation_id).into());
            }
            let claimed = guard.claim_pending();
            if claimed.is_empty() {
                return Err(ConversationError::ToolsExecuting(conversation_id).into());
            }
            claimed
        };

        let ctx = ToolContext::new(conversation_id.clone(), Arc::clone(&self.workspaces));
        let results = join_all(claimed.iter().map(|call| self.run_tool_call(&ctx, call))).await;

        let outcome = self
            .tool_results_step(conversation_id.clone(), results, Submitter::Executor)
            .await;
        if outcome.is_err()
            && let Ok(mut guard) = self.store.lock(&conversation_id).await
        {
            guard.release_claims();
        }
        outcome
    }

    async fn tool_results_step(
        &self,
        conversation_id: ConversationId,
        results: Vec<ToolResult>,
        submitter: Submitter,
    ) -> Result<TurnOutcome> {
        if results.is_empty() {
            return Err(ConversationError::EmptySubmission.into());
        }

        let mut guard = self
            .store
            .lock_settled(&conversation_id, self.config.settle_timeout)
            .await?;

        let mut seen = std::collections::HashSet::new();
        for result in &results {
            if !seen.insert(result.tool_call_id.as_str()) {
                return Err(ConversationError::DuplicateToolResult(result.tool_call_id.clone()).into());
            }
            if !guard.is_pending(&result.tool_call_id) {
                return Err(ConversationError::UnknownToolCall {
                    conversation_id,
                    tool_call_id: result.tool_call_id.clone(),
                }
                .into());
            }
            if submitter == Submitter::Client && guard.is_claimed(&result.tool_call_id) {
                return Err(ConversationError::ToolsExecuting(conversation_id).into());
            }
        }

        for result in &results {
            guard.append(Message::tool_result(result));
            guard.resolve_pending_tool_call(&result.tool_call_id)?;
        }

        let remaining = guard.pending_tool_calls();
        if !remaining.is_empty() {
            tracing::debug!(
                conversation_id = %conversation_id,
                remaining = remaining.len(),
                "Waiting for more tool results"
            );
            return Ok(TurnOutcome {
                conversation_id,
                state: guard.state(),
                message: None,
                tool_calls: remaining,
                fallback: false,
            });
        }

        self.call_model(guard).await
    }

    /// Send the history to the model and apply its reply.
    ///
    /// The lock is released for the duration of the gateway call and taken
    /// again to record the reply.
    async fn call_model(&self, mut guard: ConversationGuard) -> Result<TurnOutcome> {
        guard.set_state(ConversationState::AwaitingModelReply);
        let conversation_id = guard.id().clone();
        let request = ToolCompletionRequest::new(
            guard.messages().to_vec(),
            self.registry.definitions().await,
        );
        drop(guard);

        let reply = self.send(request).await;

        let mut guard = self.store.lock(&conversation_id).await?;
        match reply {
            Ok(reply) => Ok(self.apply_reply(&mut guard, reply).await),
            Err(e) => Ok(fall_back(&mut guard, &e)),
        }
    }

    async fn send(&self, request: ToolCompletionRequest) -> std::result::Result<ModelReply, LlmError> {
        let provider = self.provider.model_name().to_string();
        let reply = tokio::time::timeout(
            self.config.gateway_timeout,
            self.provider.complete_with_tools(request),
        )
        .await
        .unwrap_or_else(|_| {
            Err(LlmError::Timeout {
                provider: provider.clone(),
                timeout: self.config.gateway_timeout,
            })
        })?;
        reply.validate(&provider)?;
        Ok(reply)
    }

    async fn apply_reply(&self, guard: &mut ConversationGuard, reply: ModelReply) -> TurnOutcome {
        let conversation_id = guard.id().clone();

        if !reply.has_tool_uses() {
            let message = Message::assistant(reply.joined_text());
            guard.append(message.clone());
            guard.set_state(ConversationState::Idle);
            return TurnOutcome {
                conversation_id,
                state: ConversationState::Idle,
                message: Some(message),
                tool_calls: Vec::new(),
                fallback: false,
            };
        }

        let mut blocks = Vec::with_capacity(reply.blocks.len());
        let mut tool_calls = Vec::new();
        for block in reply.blocks {
            match block {
                ReplyBlock::Text(text) => blocks.push(ContentBlock::Text { text }),
                ReplyBlock::ToolUse(tool_use) => {
                    let tool = self
                        .registry
                        .get(&tool_use.name)
                        .await
                        .ok()
                        .map(|t| t.definition());
                    blocks.push(ContentBlock::ToolUse {
                        id: tool_use.id.clone(),
                        name: tool_use.name.clone(),
                        input: tool_use.input.clone(),
                    });
                    tool_calls.push(ToolCall {
                        id: tool_use.id,
                        name: tool_use.name,
                        tool,
                        input: tool_use.input,
                    });
                }
            }
        }

        let message = Message::assistant_blocks(blocks);
        guard.append(message.clone());
        for call in &tool_calls {
            guard.record_pending_tool_call(call.clone());
        }
        guard.set_state(ConversationState::AwaitingToolResults);

        tracing::debug!(
            conversation_id = %conversation_id,
            tool_calls = tool_calls.len(),
            "Model requested tools"
        );

        TurnOutcome {
            conversation_id,
            state: ConversationState::AwaitingToolResults,
            message: Some(message),
            tool_calls,
            fallback: false,
        }
    }

    async fn run_tool_call(&self, ctx: &ToolContext, call: &ToolCall) -> ToolResult {
        match self
            .registry
            .execute(ctx, &call.name, call.input.clone())
            .await
        {
            Ok(output) => ToolResult::success(call.id.clone(), output.result),
            Err(e) => {
                if matches!(e, ToolError::ToolNotFound(_) | ToolError::Validation { .. }) {
                    tracing::info!(
                        conversation_id = %ctx.conversation_id,
                        tool = %call.name,
                        error = %e,
                        "Rejected tool call"
                    );
                }
                ToolResult::failure(call.id.clone(), e.to_string())
            }
        }
    }
}

/// Who is submitting a batch of tool results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Submitter {
    Client,
    /// Server-side execution that holds claims on the calls it answers.
    Executor,
}

/// Record the fallback reply and settle the conversation.
fn fall_back(guard: &mut ConversationGuard, error: &LlmError) -> TurnOutcome {
    tracing::warn!(
        conversation_id = %guard.id(),
        error = %error,
        "Gateway call failed, replying with fallback"
    );

    let message = Message::assistant(fallback_text(guard.latest_user_text()));
    guard.append(message.clone());
    guard.set_state(ConversationState::Idle);

    TurnOutcome {
        conversation_id: guard.id().clone(),
        state: ConversationState::Idle,
        message: Some(message),
        tool_calls: Vec::new(),
        fallback: true,
    }
}

/// Run one step on its own task so a dropped request cannot abandon it
/// half-way.
async fn spawn_step<F, T>(step: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(step)
        .await
        .map_err(|e| Error::Internal(format!("Orchestration step failed: {}", e)))?
}
