#![deny(missing_docs)]
//! In-memory implementation of keel's `SessionStore`.
//!
//! Sessions, conversation states, and event logs live in maps behind a
//! `RwLock`. History and event logs are bounded (append-right,
//! drop-left); cleanup evicts sessions by TTL and LRU pressure. Nothing
//! survives a restart; pair with the file store when durability
//! matters.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use keel::{
    codes, AgentError, CleanupReport, ConversationState, DurationMs, MetadataMap,
    ProcessingEvent, Session, SessionId, SessionStore, SessionTurn, StoreStatistics,
};

/// Bounds and lifetimes shared by every store backend.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Maximum turns retained per session.
    pub max_history_size: usize,
    /// Maximum processing events retained per session.
    pub max_events_per_session: usize,
    /// Maximum live sessions before LRU eviction.
    pub max_sessions: usize,
    /// Idle time after which a session expires.
    pub session_ttl: DurationMs,
    /// How often the background cleanup task runs.
    pub cleanup_interval: DurationMs,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_history_size: 100,
            max_events_per_session: 1000,
            max_sessions: 1000,
            session_ttl: DurationMs::from_secs(24 * 60 * 60),
            cleanup_interval: DurationMs::from_secs(60 * 60),
        }
    }
}

struct Inner {
    sessions: HashMap<SessionId, Session>,
    conversations: HashMap<SessionId, ConversationState>,
    events: HashMap<SessionId, VecDeque<ProcessingEvent>>,
}

/// In-memory session store.
pub struct MemoryStore {
    config: StoreConfig,
    inner: RwLock<Inner>,
    shutdown: CancellationToken,
}

impl MemoryStore {
    /// An empty store with the given bounds.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                sessions: HashMap::new(),
                conversations: HashMap::new(),
                events: HashMap::new(),
            }),
            shutdown: CancellationToken::new(),
        }
    }

    /// The store's configured bounds.
    pub fn config(&self) -> StoreConfig {
        self.config
    }

    /// Insert (or replace) a session verbatim, without bumping its
    /// access stamp. Used by the hybrid store to populate the memory
    /// layer from disk.
    pub async fn insert_session(&self, session: Session) {
        let mut inner = self.inner.write().await;
        inner.sessions.insert(session.session_id.clone(), session);
    }

    /// Spawn the periodic cleanup task. The task stops when the store
    /// shuts down.
    pub fn start_cleanup(self: &Arc<Self>) {
        let store = Arc::clone(self);
        let interval = self.config.cleanup_interval.to_std();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = store.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        match SessionStore::cleanup(store.as_ref()).await {
                            Ok(report) => debug!(?report, "store cleanup pass"),
                            Err(e) => debug!(error = %e, "store cleanup failed"),
                        }
                    }
                }
            }
        });
    }

    fn expired(&self, session: &Session) -> bool {
        let ttl = ChronoDuration::milliseconds(self.config.session_ttl.as_millis() as i64);
        Utc::now() - session.last_accessed_at > ttl
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(
        &self,
        domain: &str,
        metadata: MetadataMap,
    ) -> Result<Session, AgentError> {
        let mut session = Session::new(SessionId::generate(), domain);
        session.metadata = metadata;
        let mut inner = self.inner.write().await;
        inner
            .sessions
            .insert(session.session_id.clone(), session.clone());
        info!(session = %session.session_id, domain, "session created");
        Ok(session)
    }

    async fn get_or_create_session(
        &self,
        id: &SessionId,
        domain: &str,
    ) -> Result<Session, AgentError> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .entry(id.clone())
            .or_insert_with(|| Session::new(id.clone(), domain));
        session.last_accessed_at = Utc::now();
        Ok(session.clone())
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, AgentError> {
        let mut inner = self.inner.write().await;
        Ok(inner.sessions.get_mut(id).map(|session| {
            session.last_accessed_at = Utc::now();
            session.clone()
        }))
    }

    async fn update_session(
        &self,
        id: &SessionId,
        metadata: MetadataMap,
    ) -> Result<Session, AgentError> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.get_mut(id).ok_or_else(|| {
            AgentError::validation(codes::SESSION_NOT_FOUND, format!("unknown session: {id}"))
        })?;
        session.metadata.extend(metadata);
        session.last_accessed_at = Utc::now();
        Ok(session.clone())
    }

    async fn delete_session(&self, id: &SessionId) -> Result<(), AgentError> {
        let mut inner = self.inner.write().await;
        inner.sessions.remove(id);
        inner.conversations.remove(id);
        inner.events.remove(id);
        Ok(())
    }

    async fn append_turn(&self, id: &SessionId, turn: SessionTurn) -> Result<(), AgentError> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.get_mut(id).ok_or_else(|| {
            AgentError::validation(codes::SESSION_NOT_FOUND, format!("unknown session: {id}"))
        })?;
        session.history.push(turn);
        if session.history.len() > self.config.max_history_size {
            let overflow = session.history.len() - self.config.max_history_size;
            session.history.drain(..overflow);
        }
        session.last_accessed_at = Utc::now();
        Ok(())
    }

    async fn save_conversation_state(&self, state: ConversationState) -> Result<(), AgentError> {
        let mut inner = self.inner.write().await;
        inner.conversations.insert(state.session_id.clone(), state);
        Ok(())
    }

    async fn get_conversation_state(
        &self,
        id: &SessionId,
    ) -> Result<Option<ConversationState>, AgentError> {
        let inner = self.inner.read().await;
        Ok(inner.conversations.get(id).cloned())
    }

    async fn add_processing_event(&self, event: ProcessingEvent) -> Result<(), AgentError> {
        let mut inner = self.inner.write().await;
        let log = inner.events.entry(event.session_id.clone()).or_default();
        if log.len() == self.config.max_events_per_session {
            log.pop_front();
        }
        log.push_back(event);
        Ok(())
    }

    async fn get_processing_history(
        &self,
        id: &SessionId,
        limit: Option<usize>,
    ) -> Result<Vec<ProcessingEvent>, AgentError> {
        let inner = self.inner.read().await;
        let Some(log) = inner.events.get(id) else {
            return Ok(vec![]);
        };
        let newest_first = log.iter().rev();
        Ok(match limit {
            Some(n) => newest_first.take(n).cloned().collect(),
            None => newest_first.cloned().collect(),
        })
    }

    async fn cleanup(&self) -> Result<CleanupReport, AgentError> {
        let mut inner = self.inner.write().await;
        let mut report = CleanupReport::default();

        let expired: Vec<SessionId> = inner
            .sessions
            .values()
            .filter(|s| self.expired(s))
            .map(|s| s.session_id.clone())
            .collect();
        for id in &expired {
            inner.sessions.remove(id);
        }
        report.expired_sessions = expired.len();

        if inner.sessions.len() > self.config.max_sessions {
            let mut by_access: Vec<(SessionId, chrono::DateTime<Utc>)> = inner
                .sessions
                .values()
                .map(|s| (s.session_id.clone(), s.last_accessed_at))
                .collect();
            by_access.sort_by_key(|(_, at)| *at);
            let excess = inner.sessions.len() - self.config.max_sessions;
            for (id, _) in by_access.into_iter().take(excess) {
                inner.sessions.remove(&id);
                report.evicted_sessions += 1;
            }
        }

        let live: Vec<SessionId> = inner.sessions.keys().cloned().collect();
        let orphaned_conversations: Vec<SessionId> = inner
            .conversations
            .keys()
            .filter(|id| !live.contains(id))
            .cloned()
            .collect();
        for id in &orphaned_conversations {
            inner.conversations.remove(id);
        }
        report.orphaned_conversations = orphaned_conversations.len();

        let orphaned_events: Vec<SessionId> = inner
            .events
            .keys()
            .filter(|id| !live.contains(id))
            .cloned()
            .collect();
        for id in &orphaned_events {
            inner.events.remove(id);
        }
        report.orphaned_event_logs = orphaned_events.len();

        Ok(report)
    }

    async fn shutdown(&self) -> Result<(), AgentError> {
        self.shutdown.cancel();
        Ok(())
    }

    async fn statistics(&self) -> Result<StoreStatistics, AgentError> {
        let inner = self.inner.read().await;
        Ok(StoreStatistics {
            sessions: inner.sessions.len(),
            conversations: inner.conversations.len(),
            events: inner.events.values().map(VecDeque::len).sum(),
            oldest_access: inner.sessions.values().map(|s| s.last_accessed_at).min(),
            newest_access: inner.sessions.values().map(|s| s.last_accessed_at).max(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel::TurnRole;

    fn store() -> MemoryStore {
        MemoryStore::new(StoreConfig::default())
    }

    #[tokio::test]
    async fn create_get_update_delete_roundtrip() {
        let store = store();
        let session = store.create_session("coding", MetadataMap::new()).await.unwrap();
        let id = session.session_id.clone();

        let fetched = store.get_session(&id).await.unwrap().unwrap();
        assert_eq!(fetched.domain, "coding");

        let mut update = MetadataMap::new();
        update.insert("mode".into(), "editing".into());
        let updated = store.update_session(&id, update).await.unwrap();
        assert_eq!(updated.metadata["mode"], "editing");

        store.delete_session(&id).await.unwrap();
        assert!(store.get_session(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_is_bounded_oldest_dropped() {
        let store = MemoryStore::new(StoreConfig {
            max_history_size: 3,
            ..StoreConfig::default()
        });
        let session = store.create_session("chat", MetadataMap::new()).await.unwrap();
        let id = session.session_id.clone();
        for i in 0..5 {
            store
                .append_turn(&id, SessionTurn::new(TurnRole::User, format!("m{i}")))
                .await
                .unwrap();
        }
        let history = store.get_session(&id).await.unwrap().unwrap().history;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "m2");
        assert_eq!(history[2].content, "m4");
    }

    #[tokio::test]
    async fn events_are_bounded_newest_retained() {
        let store = MemoryStore::new(StoreConfig {
            max_events_per_session: 2,
            ..StoreConfig::default()
        });
        let session = store.create_session("chat", MetadataMap::new()).await.unwrap();
        let id = session.session_id.clone();
        for i in 0..4 {
            store
                .add_processing_event(ProcessingEvent::new(
                    id.clone(),
                    "prompt",
                    serde_json::json!({ "i": i }),
                ))
                .await
                .unwrap();
        }
        let history = store.get_processing_history(&id, None).await.unwrap();
        assert_eq!(history.len(), 2);
        // Newest first.
        assert_eq!(history[0].data["i"], 3);
        assert_eq!(history[1].data["i"], 2);
    }

    #[tokio::test]
    async fn ttl_expiry_and_orphan_purge() {
        let store = MemoryStore::new(StoreConfig {
            session_ttl: DurationMs::ZERO,
            ..StoreConfig::default()
        });
        let session = store.create_session("chat", MetadataMap::new()).await.unwrap();
        let id = session.session_id.clone();
        store
            .save_conversation_state(ConversationState::new(id.clone()))
            .await
            .unwrap();
        store
            .add_processing_event(ProcessingEvent::new(id.clone(), "prompt", serde_json::json!({})))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let report = SessionStore::cleanup(&store).await.unwrap();
        assert_eq!(report.expired_sessions, 1);
        assert_eq!(report.orphaned_conversations, 1);
        assert_eq!(report.orphaned_event_logs, 1);
        assert!(store.get_session(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lru_eviction_above_max_sessions() {
        let store = MemoryStore::new(StoreConfig {
            max_sessions: 2,
            ..StoreConfig::default()
        });
        let a = store.create_session("a", MetadataMap::new()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let b = store.create_session("b", MetadataMap::new()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let c = store.create_session("c", MetadataMap::new()).await.unwrap();

        // Touch `a` so `b` becomes the LRU victim.
        store.get_session(&a.session_id).await.unwrap();
        let report = SessionStore::cleanup(&store).await.unwrap();
        assert_eq!(report.evicted_sessions, 1);
        assert!(store.get_session(&b.session_id).await.unwrap().is_none());
        assert!(store.get_session(&a.session_id).await.unwrap().is_some());
        assert!(store.get_session(&c.session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn statistics_reflect_contents() {
        let store = store();
        let s = store.create_session("chat", MetadataMap::new()).await.unwrap();
        store
            .add_processing_event(ProcessingEvent::new(
                s.session_id.clone(),
                "prompt",
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.events, 1);
        assert!(stats.newest_access.is_some());
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = store();
        let id = SessionId::new("fixed");
        let first = store.get_or_create_session(&id, "chat").await.unwrap();
        let second = store.get_or_create_session(&id, "other").await.unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(second.domain, "chat", "existing session keeps its domain");
    }
}
