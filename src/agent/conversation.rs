//! Conversation state: ordered messages, pending tool calls, and the
//! orchestration state machine position.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::message::{Message, PendingToolCall, Role, ToolCall, ToolResult};
use crate::error::ConversationError;

/// Opaque conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Allocate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a conversation in the orchestration state machine.
///
/// ```text
/// Idle ──user turn──▶ AwaitingModelReply ──text reply──▶ Idle
///                          ▲       │
///                          │       └──tool use──▶ AwaitingToolResults
///                          └────all results submitted────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    Idle,
    AwaitingModelReply,
    AwaitingToolResults,
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationState::Idle => write!(f, "idle"),
            ConversationState::AwaitingModelReply => write!(f, "awaiting_model_reply"),
            ConversationState::AwaitingToolResults => write!(f, "awaiting_tool_results"),
        }
    }
}

/// A conversation's message log and pending tool-call set.
#[derive(Debug, Clone)]
pub struct Conversation {
    id: ConversationId,
    messages: Vec<Message>,
    pending: Vec<PendingToolCall>,
    state: ConversationState,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            pending: Vec::new(),
            state: ConversationState::Idle,
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ConversationState) {
        if self.state != state {
            tracing::debug!(
                conversation_id = %self.id,
                from = %self.state,
                to = %state,
                "Conversation state transition"
            );
        }
        self.state = state;
    }

    /// Append a message to the end of the log.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
        self.last_active_at = Utc::now();
    }

    /// Append a raw text turn unless it would sit directly after another raw
    /// turn of the same role, in which case it is ignored.
    ///
    /// Returns whether the turn was stored.
    pub fn append_raw_turn(&mut self, role: Role, text: impl Into<String>) -> bool {
        let duplicate_role = self
            .messages
            .last()
            .is_some_and(|last| last.role == role && last.is_raw_text());
        if duplicate_role {
            tracing::debug!(
                conversation_id = %self.id,
                role = %role,
                "Ignoring consecutive raw turn with the same role"
            );
            return false;
        }

        let message = match role {
            Role::User => Message::user(text),
            Role::Assistant => Message::assistant(text),
        };
        self.append(message);
        true
    }

    /// Text of the most recent raw user turn, skipping tool-result messages.
    pub fn latest_user_text(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|message| {
            match (&message.role, &message.content) {
                (Role::User, crate::agent::message::MessageContent::Text(text)) => {
                    Some(text.as_str())
                }
                _ => None,
            }
        })
    }

    /// Mark a tool call as pending.
    pub fn record_pending_tool_call(&mut self, call: ToolCall) {
        self.pending.retain(|pending| pending.call.id != call.id);
        self.pending.push(PendingToolCall {
            call,
            recorded_at: Utc::now(),
            executing: false,
        });
    }

    /// Remove a tool call from the pending set.
    pub fn resolve_pending_tool_call(
        &mut self,
        tool_call_id: &str,
    ) -> Result<ToolCall, ConversationError> {
        let index = self
            .pending
            .iter()
            .position(|pending| pending.call.id == tool_call_id)
            .ok_or_else(|| ConversationError::UnknownToolCall {
                conversation_id: self.id.clone(),
                tool_call_id: tool_call_id.to_string(),
            })?;
        Ok(self.pending.remove(index).call)
    }

    pub fn is_pending(&self, tool_call_id: &str) -> bool {
        self.pending
            .iter()
            .any(|pending| pending.call.id == tool_call_id)
    }

    /// Pending tool calls in the order the model requested them.
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        self.pending
            .iter()
            .map(|pending| pending.call.clone())
            .collect()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.pending
            .iter()
            .map(|pending| pending.call.id.clone())
            .collect()
    }

    /// Whether a server-side execution owns any pending tool call.
    pub fn is_executing(&self) -> bool {
        self.pending.iter().any(|pending| pending.executing)
    }

    pub fn is_claimed(&self, tool_call_id: &str) -> bool {
        self.pending
            .iter()
            .any(|pending| pending.executing && pending.call.id == tool_call_id)
    }

    /// Claim every pending tool call for server-side execution.
    ///
    /// Returns nothing if another execution already holds a claim.
    pub fn claim_pending(&mut self) -> Vec<ToolCall> {
        if self.is_executing() {
            return Vec::new();
        }
        self.pending
            .iter_mut()
            .map(|pending| {
                pending.executing = true;
                pending.call.clone()
            })
            .collect()
    }

    /// Hand claimed tool calls back to the client.
    pub fn release_claims(&mut self) {
        for pending in &mut self.pending {
            pending.executing = false;
        }
    }

    /// When the oldest pending tool call was recorded.
    pub fn oldest_pending_at(&self) -> Option<DateTime<Utc>> {
        self.pending.iter().map(|pending| pending.recorded_at).min()
    }

    /// Give up on every pending tool call.
    ///
    /// Each one gets an error-marked tool result in the history so the log
    /// stays well-formed for the model. Returns the abandoned calls.
    pub fn abandon_pending(&mut self, reason: &str) -> Vec<ToolCall> {
        let abandoned: Vec<ToolCall> = self.pending.drain(..).map(|p| p.call).collect();
        for call in &abandoned {
            let result = ToolResult::failure(call.id.clone(), reason);
            self.append(Message::tool_result(&result));
        }
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::message::ContentBlock;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "read_file".to_string(),
            tool: None,
            input: serde_json::json!({"path": "x.txt"}),
        }
    }

    #[test]
    fn test_raw_turns_never_repeat_role() {
        let mut conversation = Conversation::new(ConversationId::new());

        assert!(conversation.append_raw_turn(Role::User, "hello"));
        assert!(!conversation.append_raw_turn(Role::User, "hello again"));
        assert!(conversation.append_raw_turn(Role::Assistant, "hi"));
        assert!(!conversation.append_raw_turn(Role::Assistant, "hi again"));
        assert!(conversation.append_raw_turn(Role::User, "bye"));

        let roles: Vec<Role> = conversation.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    }

    #[test]
    fn test_raw_user_turn_allowed_after_tool_result() {
        let mut conversation = Conversation::new(ConversationId::new());
        conversation.append(Message::tool_result(&ToolResult::success(
            "t1",
            serde_json::json!("ok"),
        )));

        assert!(conversation.append_raw_turn(Role::User, "thanks"));
    }

    #[test]
    fn test_resolve_unknown_tool_call_fails_without_mutation() {
        let mut conversation = Conversation::new(ConversationId::new());
        conversation.record_pending_tool_call(call("t1"));

        let err = conversation.resolve_pending_tool_call("nope").unwrap_err();
        assert!(matches!(err, ConversationError::UnknownToolCall { .. }));
        assert_eq!(conversation.pending_ids(), vec!["t1".to_string()]);

        conversation.resolve_pending_tool_call("t1").unwrap();
        assert!(conversation.pending_tool_calls().is_empty());

        let err = conversation.resolve_pending_tool_call("t1").unwrap_err();
        assert!(matches!(err, ConversationError::UnknownToolCall { .. }));
    }

    #[test]
    fn test_claim_pending_is_exclusive() {
        let mut conversation = Conversation::new(ConversationId::new());
        conversation.record_pending_tool_call(call("t1"));
        conversation.record_pending_tool_call(call("t2"));

        let claimed = conversation.claim_pending();
        assert_eq!(claimed.len(), 2);
        assert!(conversation.is_claimed("t1"));
        assert!(conversation.claim_pending().is_empty());

        conversation.release_claims();
        assert!(!conversation.is_executing());
        assert_eq!(conversation.claim_pending().len(), 2);

        conversation.resolve_pending_tool_call("t1").unwrap();
        conversation.resolve_pending_tool_call("t2").unwrap();
        assert!(!conversation.is_executing());
    }

    #[test]
    fn test_latest_user_text_skips_tool_results() {
        let mut conversation = Conversation::new(ConversationId::new());
        conversation.append_raw_turn(Role::User, "what is in x.txt?");
        conversation.append(Message::tool_result(&ToolResult::success(
            "t1",
            serde_json::json!("contents"),
        )));

        assert_eq!(conversation.latest_user_text(), Some("what is in x.txt?"));
    }

    #[test]
    fn test_abandon_pending_appends_error_results() {
        let mut conversation = Conversation::new(ConversationId::new());
        conversation.record_pending_tool_call(call("t1"));
        conversation.record_pending_tool_call(call("t2"));

        let abandoned = conversation.abandon_pending("abandoned");

        assert_eq!(abandoned.len(), 2);
        assert!(conversation.pending_tool_calls().is_empty());
        assert_eq!(conversation.messages().len(), 2);
        match &conversation.messages()[0].content {
            crate::agent::message::MessageContent::Blocks(blocks) => {
                assert!(matches!(
                    &blocks[0],
                    ContentBlock::ToolResult { tool_use_id, is_error: true, .. } if tool_use_id == "t1"
                ));
            }
            other => panic!("unexpected content {other:?}"),
        }
    }
}
