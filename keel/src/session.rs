//! The Session protocol — conversation history, state, and event log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::AgentError;
use crate::id::{EventId, SessionId, TurnId};
use crate::request::MetadataMap;

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// The human.
    User,
    /// The agent.
    Assistant,
    /// Injected system content.
    System,
}

/// One message in a session's conversation history.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTurn {
    /// Unique id of this turn.
    pub turn_id: TurnId,
    /// When the turn was recorded.
    pub timestamp: DateTime<Utc>,
    /// Who authored the turn.
    pub role: TurnRole,
    /// The turn content.
    pub content: String,
    /// Turn-level metadata (handler kind, timings).
    #[serde(default)]
    pub metadata: MetadataMap,
}

impl SessionTurn {
    /// A turn with a fresh id, stamped now.
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            turn_id: TurnId::generate(),
            timestamp: Utc::now(),
            role,
            content: content.into(),
            metadata: MetadataMap::new(),
        }
    }
}

/// A conversation session. `history` is bounded by the store's
/// `max_history_size`; overflow drops the oldest turns first.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub session_id: SessionId,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last read or written. Drives TTL and LRU
    /// eviction.
    pub last_accessed_at: DateTime<Utc>,
    /// Free-form domain tag ("coding", "chat").
    pub domain: String,
    /// Session-level metadata.
    #[serde(default)]
    pub metadata: MetadataMap,
    /// Conversation turns, oldest first.
    #[serde(default)]
    pub history: Vec<SessionTurn>,
}

impl Session {
    /// A fresh session stamped now.
    pub fn new(session_id: SessionId, domain: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            created_at: now,
            last_accessed_at: now,
            domain: domain.into(),
            metadata: MetadataMap::new(),
            history: vec![],
        }
    }
}

/// Durable per-session runtime state: free-form context plus workflow
/// checkpoints keyed by `"{workflow_id}/{step_index}"`.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    /// The session this state belongs to.
    pub session_id: SessionId,
    /// Free-form conversation context.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// Workflow checkpoints.
    #[serde(default)]
    pub checkpoints: HashMap<String, serde_json::Value>,
    /// When the state was last saved.
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    /// Empty state for a session, stamped now.
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            context: HashMap::new(),
            checkpoints: HashMap::new(),
            updated_at: Utc::now(),
        }
    }
}

/// One entry in a session's append-only processing log. The log is
/// capped per session (newest retained).
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingEvent {
    /// Unique event id.
    pub event_id: EventId,
    /// The session this event belongs to.
    pub session_id: SessionId,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Event kind ("command", "prompt", "workflow_execution", ...).
    pub kind: String,
    /// Event payload.
    pub data: serde_json::Value,
}

impl ProcessingEvent {
    /// An event with a fresh id, stamped now.
    pub fn new(session_id: SessionId, kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_id: EventId::generate(),
            session_id,
            timestamp: Utc::now(),
            kind: kind.into(),
            data,
        }
    }
}

/// What a cleanup pass removed.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Sessions removed because their TTL expired.
    pub expired_sessions: usize,
    /// Sessions removed by LRU pressure above `max_sessions`.
    pub evicted_sessions: usize,
    /// Conversation states whose session no longer exists.
    pub orphaned_conversations: usize,
    /// Event logs whose session no longer exists.
    pub orphaned_event_logs: usize,
}

/// Aggregate counts for the status surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStatistics {
    /// Live sessions.
    pub sessions: usize,
    /// Saved conversation states.
    pub conversations: usize,
    /// Total processing events across sessions.
    pub events: usize,
    /// Oldest `last_accessed_at` among live sessions.
    pub oldest_access: Option<DateTime<Utc>>,
    /// Newest `last_accessed_at` among live sessions.
    pub newest_access: Option<DateTime<Utc>>,
}

/// Session and context persistence.
///
/// Implementations: in-memory (testing, ephemeral), file-backed
/// (one JSON file per session under `sessions/`, `conversations/`,
/// `events/`), and hybrid (memory-first reads, write-through).
/// All implementations serialise writes per session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session with a generated id.
    async fn create_session(
        &self,
        domain: &str,
        metadata: MetadataMap,
    ) -> Result<Session, AgentError>;

    /// Fetch the session with this id, or create it. Either way the
    /// session's `last_accessed_at` is bumped.
    async fn get_or_create_session(
        &self,
        id: &SessionId,
        domain: &str,
    ) -> Result<Session, AgentError>;

    /// Fetch a session. Bumps `last_accessed_at` when found.
    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, AgentError>;

    /// Merge metadata into a session. Errors with `SESSION_NOT_FOUND`
    /// when the session does not exist.
    async fn update_session(
        &self,
        id: &SessionId,
        metadata: MetadataMap,
    ) -> Result<Session, AgentError>;

    /// Delete a session along with its conversation state and events.
    async fn delete_session(&self, id: &SessionId) -> Result<(), AgentError>;

    /// Append a turn, trimming history to the configured bound.
    async fn append_turn(&self, id: &SessionId, turn: SessionTurn) -> Result<(), AgentError>;

    /// Save (overwrite) a session's conversation state.
    async fn save_conversation_state(&self, state: ConversationState) -> Result<(), AgentError>;

    /// Fetch a session's conversation state.
    async fn get_conversation_state(
        &self,
        id: &SessionId,
    ) -> Result<Option<ConversationState>, AgentError>;

    /// Append a processing event, trimming the log to the configured
    /// bound.
    async fn add_processing_event(&self, event: ProcessingEvent) -> Result<(), AgentError>;

    /// Newest-first slice of a session's event log.
    async fn get_processing_history(
        &self,
        id: &SessionId,
        limit: Option<usize>,
    ) -> Result<Vec<ProcessingEvent>, AgentError>;

    /// Run one eviction pass: TTL-expired sessions, LRU overflow, and
    /// orphaned conversation/event records.
    async fn cleanup(&self) -> Result<CleanupReport, AgentError>;

    /// Stop background work and flush pending writes.
    async fn shutdown(&self) -> Result<(), AgentError>;

    /// Aggregate counts for the status surface.
    async fn statistics(&self) -> Result<StoreStatistics, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_turn_serde_roundtrip() {
        let turn = SessionTurn::new(TurnRole::User, "hello");
        let json = serde_json::to_string(&turn).unwrap();
        let back: SessionTurn = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, TurnRole::User);
        assert_eq!(back.content, "hello");
    }

    #[test]
    fn turn_role_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TurnRole::Assistant).unwrap(),
            "\"assistant\""
        );
    }
}
