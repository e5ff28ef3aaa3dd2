//! Core agent logic.
//!
//! The agent owns:
//! - Conversation logs and their state machine
//! - Pending tool-call bookkeeping
//! - The orchestration loop between the model and tools
//! - The fallback reply used when the model is unavailable

mod conversation;
mod fallback;
mod message;
mod orchestrator;
mod store;

pub use conversation::{Conversation, ConversationId, ConversationState};
pub use fallback::{FALLBACK_PREFIX, fallback_text};
pub use message::{
    ContentBlock, IncomingTurn, Message, MessageContent, PendingToolCall, Role, ToolCall,
    ToolResult, merge_turns,
};
pub use orchestrator::{Orchestrator, OrchestratorConfig, TurnOutcome};
pub use store::{
    ABANDONED_REASON, ConversationGuard, ConversationSnapshot, ConversationStore,
    spawn_pending_sweeper,
};
