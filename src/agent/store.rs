//! Conversation store for concurrent conversation handling.
//!
//! Owns every conversation's message log and pending tool-call set. Each
//! conversation sits behind its own mutex so that different ids never block
//! each other, while mutations on a single id are serialized.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, watch};

use crate::agent::conversation::{Conversation, ConversationId, ConversationState};
use crate::agent::message::{Message, ToolCall};
use crate::error::ConversationError;
use crate::workspace::WorkspaceManager;

/// Reason recorded on tool calls that were given up on.
pub const ABANDONED_REASON: &str = "abandoned";

struct ConversationSlot {
    conversation: Arc<Mutex<Conversation>>,
    state: watch::Sender<ConversationState>,
}

impl ConversationSlot {
    fn new(id: ConversationId) -> Self {
        let (state, _) = watch::channel(ConversationState::Idle);
        Self {
            conversation: Arc::new(Mutex::new(Conversation::new(id))),
            state,
        }
    }
}

/// Exclusive access to one conversation for the length of a state-machine step.
///
/// Dropping the guard releases the conversation on every exit path.
pub struct ConversationGuard {
    slot: Arc<ConversationSlot>,
    inner: OwnedMutexGuard<Conversation>,
}

impl ConversationGuard {
    /// Move the conversation to `state` and wake anyone waiting on it.
    pub fn set_state(&mut self, state: ConversationState) {
        self.inner.set_state(state);
        self.slot.state.send_replace(state);
    }
}

impl Deref for ConversationGuard {
    type Target = Conversation;

    fn deref(&self) -> &Conversation {
        &self.inner
    }
}

impl DerefMut for ConversationGuard {
    fn deref_mut(&mut self) -> &mut Conversation {
        &mut self.inner
    }
}

/// Point-in-time view of a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSnapshot {
    pub conversation_id: ConversationId,
    pub state: ConversationState,
    pub messages: Vec<Message>,
    pub pending_tool_calls: Vec<ToolCall>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl From<&Conversation> for ConversationSnapshot {
    fn from(conversation: &Conversation) -> Self {
        Self {
            conversation_id: conversation.id().clone(),
            state: conversation.state(),
            messages: conversation.messages().to_vec(),
            pending_tool_calls: conversation.pending_tool_calls(),
            created_at: conversation.created_at,
            last_active_at: conversation.last_active_at,
        }
    }
}

/// Manages all live conversations.
pub struct ConversationStore {
    conversations: RwLock<HashMap<ConversationId, Arc<ConversationSlot>>>,
    workspaces: Arc<WorkspaceManager>,
}

impl ConversationStore {
    pub fn new(workspaces: Arc<WorkspaceManager>) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            workspaces,
        }
    }

    /// Create a conversation with a fresh id and provision its workspace.
    pub async fn create(&self) -> ConversationId {
        let id = ConversationId::new();
        self.insert(&id).await;
        id
    }

    /// Return the log of a known conversation, or start a new one.
    ///
    /// An unknown or absent id allocates a fresh id rather than adopting the
    /// caller's, so the returned id is the one to use from here on.
    pub async fn get_or_create(
        &self,
        id: Option<&ConversationId>,
    ) -> (ConversationId, Vec<Message>) {
        if let Some(id) = id {
            if let Some(slot) = self.slot(id).await {
                let conversation = slot.conversation.lock().await;
                return (id.clone(), conversation.messages().to_vec());
            }
            tracing::debug!(conversation_id = %id, "Unknown conversation id, starting a new one");
        }
        (self.create().await, Vec::new())
    }

    /// Append a message, creating the conversation under `id` if it is unknown.
    pub async fn append(&self, id: &ConversationId, message: Message) {
        let slot = self.insert(id).await;
        let mut conversation = slot.conversation.lock().await;
        conversation.append(message);
    }

    pub async fn record_pending_tool_call(
        &self,
        id: &ConversationId,
        call: ToolCall,
    ) -> Result<(), ConversationError> {
        let mut guard = self.lock(id).await?;
        guard.record_pending_tool_call(call);
        Ok(())
    }

    pub async fn resolve_pending_tool_call(
        &self,
        id: &ConversationId,
        tool_call_id: &str,
    ) -> Result<ToolCall, ConversationError> {
        let mut guard = self.lock(id).await?;
        guard.resolve_pending_tool_call(tool_call_id)
    }

    /// Current pending set; empty for unknown conversations.
    pub async fn pending_tool_calls(&self, id: &ConversationId) -> Vec<ToolCall> {
        match self.slot(id).await {
            Some(slot) => slot.conversation.lock().await.pending_tool_calls(),
            None => Vec::new(),
        }
    }

    pub async fn history(&self, id: &ConversationId) -> Result<Vec<Message>, ConversationError> {
        let guard = self.lock(id).await?;
        Ok(guard.messages().to_vec())
    }

    pub async fn snapshot(
        &self,
        id: &ConversationId,
    ) -> Result<ConversationSnapshot, ConversationError> {
        let guard = self.lock(id).await?;
        Ok(ConversationSnapshot::from(&*guard))
    }

    pub async fn contains(&self, id: &ConversationId) -> bool {
        self.conversations.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Lock a conversation regardless of its state.
    pub async fn lock(&self, id: &ConversationId) -> Result<ConversationGuard, ConversationError> {
        let slot = self
            .slot(id)
            .await
            .ok_or_else(|| ConversationError::UnknownConversation(id.clone()))?;
        let inner = Arc::clone(&slot.conversation).lock_owned().await;
        Ok(ConversationGuard { slot, inner })
    }

    /// Lock a conversation once no model call is in flight for it.
    ///
    /// Waits at most `max_wait` for an outstanding reply to land, then fails
    /// with `Busy`.
    pub async fn lock_settled(
        &self,
        id: &ConversationId,
        max_wait: Duration,
    ) -> Result<ConversationGuard, ConversationError> {
        let slot = self
            .slot(id)
            .await
            .ok_or_else(|| ConversationError::UnknownConversation(id.clone()))?;
        let deadline = tokio::time::Instant::now() + max_wait;
        let mut state = slot.state.subscribe();

        loop {
            // The borrowed value must not outlive this statement: holding it
            // would block `set_state` on other tasks.
            let settled = tokio::time::timeout_at(deadline, async {
                state
                    .wait_for(|s| *s != ConversationState::AwaitingModelReply)
                    .await
                    .map(|_| ())
            })
            .await;
            match settled {
                Err(_) => return Err(ConversationError::Busy(id.clone())),
                Ok(Err(_)) => return Err(ConversationError::UnknownConversation(id.clone())),
                Ok(Ok(_)) => {}
            }

            let inner = tokio::time::timeout_at(
                deadline,
                Arc::clone(&slot.conversation).lock_owned(),
            )
            .await
            .map_err(|_| ConversationError::Busy(id.clone()))?;

            // Another request may have started a model call between the
            // wake-up and the lock.
            if inner.state() != ConversationState::AwaitingModelReply {
                return Ok(ConversationGuard {
                    slot: Arc::clone(&slot),
                    inner,
                });
            }
        }
    }

    /// Abandon pending tool calls that have waited longer than `max_age`.
    ///
    /// Conversations that are currently locked are skipped and picked up on a
    /// later sweep. Returns the number of conversations touched.
    pub async fn abandon_stale_pending(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::TimeDelta::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let slots: Vec<Arc<ConversationSlot>> =
            self.conversations.read().await.values().cloned().collect();

        let mut count = 0;
        for slot in slots {
            // Skip if contended (someone is actively driving it)
            let Ok(inner) = Arc::clone(&slot.conversation).try_lock_owned() else {
                continue;
            };
            let mut guard = ConversationGuard { slot, inner };

            let stale = guard.state() == ConversationState::AwaitingToolResults
                && !guard.is_executing()
                && guard.oldest_pending_at().is_some_and(|at| at < cutoff);
            if !stale {
                continue;
            }

            let abandoned = guard.abandon_pending(ABANDONED_REASON);
            guard.set_state(ConversationState::Idle);
            tracing::info!(
                conversation_id = %guard.id(),
                abandoned = abandoned.len(),
                "Abandoned stale pending tool calls"
            );
            count += 1;
        }
        count
    }

    async fn slot(&self, id: &ConversationId) -> Option<Arc<ConversationSlot>> {
        self.conversations.read().await.get(id).cloned()
    }

    async fn insert(&self, id: &ConversationId) -> Arc<ConversationSlot> {
        // Fast path: conversation exists
        if let Some(slot) = self.slot(id).await {
            return slot;
        }

        let slot = {
            let mut conversations = self.conversations.write().await;
            // Double-check after acquiring write lock
            if let Some(slot) = conversations.get(id) {
                return Arc::clone(slot);
            }
            let slot = Arc::new(ConversationSlot::new(id.clone()));
            conversations.insert(id.clone(), Arc::clone(&slot));
            slot
        };

        match self.workspaces.ensure(id).await {
            Ok(path) => tracing::debug!(
                conversation_id = %id,
                workspace = %path.display(),
                "Created conversation"
            ),
            Err(e) => tracing::warn!(
                conversation_id = %id,
                error = %e,
                "Failed to provision workspace, tools will retry lazily"
            ),
        }
        slot
    }
}

/// Periodically abandon pending tool calls older than `ttl`.
pub fn spawn_pending_sweeper(
    store: Arc<ConversationStore>,
    ttl: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let swept = store.abandon_stale_pending(ttl).await;
            if swept > 0 {
                tracing::debug!(conversations = swept, "Pending sweep finished");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::message::Role;
    use tempfile::TempDir;

    fn store() -> (TempDir, ConversationStore) {
        let dir = TempDir::new().unwrap();
        let workspaces = Arc::new(WorkspaceManager::new(dir.path()));
        (dir, ConversationStore::new(workspaces))
    }

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "read_file".to_string(),
            tool: None,
            input: serde_json::json!({"path": "x.txt"}),
        }
    }

    #[tokio::test]
    async fn test_get_or_create_provisions_workspace() {
        let (dir, store) = store();

        let (id, history) = store.get_or_create(None).await;

        assert!(history.is_empty());
        assert!(store.contains(&id).await);
        assert!(dir.path().join(id.as_str()).is_dir());
    }

    #[tokio::test]
    async fn test_get_or_create_unknown_id_allocates_fresh_id() {
        let (_dir, store) = store();
        let unknown = ConversationId::from("never-seen");

        let (id, history) = store.get_or_create(Some(&unknown)).await;

        assert_ne!(id, unknown);
        assert!(history.is_empty());
        assert!(!store.contains(&unknown).await);
    }

    #[tokio::test]
    async fn test_get_or_create_returns_existing_log() {
        let (_dir, store) = store();
        let (id, _) = store.get_or_create(None).await;
        store.append(&id, Message::user("hello")).await;

        let (same, history) = store.get_or_create(Some(&id)).await;

        assert_eq!(same, id);
        assert_eq!(history, vec![Message::user("hello")]);
    }

    #[tokio::test]
    async fn test_append_auto_creates() {
        let (_dir, store) = store();
        let id = ConversationId::from("late-arrival");

        store.append(&id, Message::user("hi")).await;

        let history = store.history(&id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_pending_round_trip() {
        let (_dir, store) = store();
        let id = store.create().await;

        store.record_pending_tool_call(&id, call("t1")).await.unwrap();
        assert_eq!(store.pending_tool_calls(&id).await.len(), 1);

        store.resolve_pending_tool_call(&id, "t1").await.unwrap();
        assert!(store.pending_tool_calls(&id).await.is_empty());

        let err = store.resolve_pending_tool_call(&id, "t1").await.unwrap_err();
        assert!(matches!(err, ConversationError::UnknownToolCall { .. }));
    }

    #[tokio::test]
    async fn test_pending_tool_calls_of_unknown_conversation_is_empty() {
        let (_dir, store) = store();
        let pending = store.pending_tool_calls(&ConversationId::from("ghost")).await;
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_lock_unknown_conversation() {
        let (_dir, store) = store();
        let err = store.lock(&ConversationId::from("ghost")).await.err().unwrap();
        assert!(matches!(err, ConversationError::UnknownConversation(_)));
    }

    #[tokio::test]
    async fn test_lock_settled_times_out_while_model_call_in_flight() {
        let (_dir, store) = store();
        let id = store.create().await;
        {
            let mut guard = store.lock(&id).await.unwrap();
            guard.set_state(ConversationState::AwaitingModelReply);
        }

        let err = store
            .lock_settled(&id, Duration::from_millis(50))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConversationError::Busy(_)));
    }

    #[tokio::test]
    async fn test_lock_settled_wakes_when_reply_lands() {
        let (_dir, store) = store();
        let store = Arc::new(store);
        let id = store.create().await;
        {
            let mut guard = store.lock(&id).await.unwrap();
            guard.set_state(ConversationState::AwaitingModelReply);
        }

        let waiter = {
            let store = Arc::clone(&store);
            let id = id.clone();
            tokio::spawn(async move {
                let guard = store.lock_settled(&id, Duration::from_secs(5)).await?;
                Ok::<_, ConversationError>(guard.state())
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        {
            let mut guard = store.lock(&id).await.unwrap();
            guard.set_state(ConversationState::Idle);
        }

        let state = waiter.await.unwrap().unwrap();
        assert_eq!(state, ConversationState::Idle);
    }

    #[tokio::test]
    async fn test_abandon_stale_pending() {
        let (_dir, store) = store();
        let id = store.create().await;
        {
            let mut guard = store.lock(&id).await.unwrap();
            guard.record_pending_tool_call(call("t1"));
            guard.set_state(ConversationState::AwaitingToolResults);
        }

        assert_eq!(store.abandon_stale_pending(Duration::from_secs(3600)).await, 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.abandon_stale_pending(Duration::ZERO).await, 1);

        let snapshot = store.snapshot(&id).await.unwrap();
        assert_eq!(snapshot.state, ConversationState::Idle);
        assert!(snapshot.pending_tool_calls.is_empty());
        assert_eq!(snapshot.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_abandon_skips_locked_conversations() {
        let (_dir, store) = store();
        let id = store.create().await;
        let mut guard = store.lock(&id).await.unwrap();
        guard.record_pending_tool_call(call("t1"));
        guard.set_state(ConversationState::AwaitingToolResults);

        assert_eq!(store.abandon_stale_pending(Duration::ZERO).await, 0);
        assert_eq!(guard.pending_ids(), vec!["t1".to_string()]);
    }
}
