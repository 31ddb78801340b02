//! Hybrid store: memory-first reads, write-through to disk.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use keel::{
    AgentError, CleanupReport, ConversationState, MetadataMap, ProcessingEvent, Session,
    SessionId, SessionStore, SessionTurn, StoreStatistics,
};
use trident_state_memory::{MemoryStore, StoreConfig};

use crate::fs_store::FsStore;

/// Memory-layer reads with synchronous write-through to an [`FsStore`].
///
/// Reads hit memory first and fall back to disk, populating the memory
/// layer; writes go to disk first (durability), then mirror into
/// memory, so a caller's next dependent read observes its own write.
pub struct HybridStore {
    memory: Arc<MemoryStore>,
    file: FsStore,
}

impl HybridStore {
    /// A hybrid store over the given root directory.
    pub fn new(root: &Path, config: StoreConfig) -> Self {
        Self {
            memory: Arc::new(MemoryStore::new(config)),
            file: FsStore::new(root, config),
        }
    }

    async fn mirror(&self, session: &Session) {
        self.memory.insert_session(session.clone()).await;
    }
}

#[async_trait]
impl SessionStore for HybridStore {
    async fn create_session(
        &self,
        domain: &str,
        metadata: MetadataMap,
    ) -> Result<Session, AgentError> {
        let session = self.file.create_session(domain, metadata).await?;
        self.mirror(&session).await;
        Ok(session)
    }

    async fn get_or_create_session(
        &self,
        id: &SessionId,
        domain: &str,
    ) -> Result<Session, AgentError> {
        if let Some(session) = self.memory.get_session(id).await? {
            return Ok(session);
        }
        let session = self.file.get_or_create_session(id, domain).await?;
        self.mirror(&session).await;
        Ok(session)
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, AgentError> {
        if let Some(session) = self.memory.get_session(id).await? {
            return Ok(Some(session));
        }
        let Some(session) = self.file.get_session(id).await? else {
            return Ok(None);
        };
        self.mirror(&session).await;
        Ok(Some(session))
    }

    async fn update_session(
        &self,
        id: &SessionId,
        metadata: MetadataMap,
    ) -> Result<Session, AgentError> {
        let session = self.file.update_session(id, metadata).await?;
        self.mirror(&session).await;
        Ok(session)
    }

    async fn delete_session(&self, id: &SessionId) -> Result<(), AgentError> {
        self.file.delete_session(id).await?;
        self.memory.delete_session(id).await
    }

    async fn append_turn(&self, id: &SessionId, turn: SessionTurn) -> Result<(), AgentError> {
        self.file.append_turn(id, turn).await?;
        // Mirror the trimmed session rather than re-applying the append,
        // so both layers agree on the bound.
        if let Some(session) = self.file.get_session(id).await? {
            self.mirror(&session).await;
        }
        Ok(())
    }

    async fn save_conversation_state(&self, state: ConversationState) -> Result<(), AgentError> {
        self.file.save_conversation_state(state.clone()).await?;
        self.memory.save_conversation_state(state).await
    }

    async fn get_conversation_state(
        &self,
        id: &SessionId,
    ) -> Result<Option<ConversationState>, AgentError> {
        if let Some(state) = self.memory.get_conversation_state(id).await? {
            return Ok(Some(state));
        }
        let Some(state) = self.file.get_conversation_state(id).await? else {
            return Ok(None);
        };
        self.memory.save_conversation_state(state.clone()).await?;
        Ok(Some(state))
    }

    async fn add_processing_event(&self, event: ProcessingEvent) -> Result<(), AgentError> {
        self.file.add_processing_event(event.clone()).await?;
        self.memory.add_processing_event(event).await
    }

    async fn get_processing_history(
        &self,
        id: &SessionId,
        limit: Option<usize>,
    ) -> Result<Vec<ProcessingEvent>, AgentError> {
        let from_memory = self.memory.get_processing_history(id, limit).await?;
        if !from_memory.is_empty() {
            return Ok(from_memory);
        }
        self.file.get_processing_history(id, limit).await
    }

    async fn cleanup(&self) -> Result<CleanupReport, AgentError> {
        // Disk is authoritative; the memory layer runs its own pass to
        // drop whatever the disk pass removed.
        let report = self.file.cleanup().await?;
        self.memory.cleanup().await?;
        Ok(report)
    }

    async fn shutdown(&self) -> Result<(), AgentError> {
        self.memory.shutdown().await?;
        self.file.shutdown().await
    }

    async fn statistics(&self) -> Result<StoreStatistics, AgentError> {
        self.file.statistics().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel::TurnRole;
    use tempfile::TempDir;

    #[tokio::test]
    async fn read_your_writes_after_append() {
        let dir = TempDir::new().unwrap();
        let store = HybridStore::new(dir.path(), StoreConfig::default());
        let session = store.create_session("coding", MetadataMap::new()).await.unwrap();
        let id = session.session_id.clone();

        store
            .append_turn(&id, SessionTurn::new(TurnRole::User, "hello"))
            .await
            .unwrap();
        let fetched = store.get_session(&id).await.unwrap().unwrap();
        assert_eq!(fetched.history.len(), 1);
    }

    #[tokio::test]
    async fn reads_fall_back_to_disk() {
        let dir = TempDir::new().unwrap();
        let id;
        {
            let seed = FsStore::new(dir.path(), StoreConfig::default());
            id = seed
                .create_session("coding", MetadataMap::new())
                .await
                .unwrap()
                .session_id;
        }
        // Fresh hybrid store: memory layer is empty, disk has the session.
        let store = HybridStore::new(dir.path(), StoreConfig::default());
        assert!(store.get_session(&id).await.unwrap().is_some());
        // Second read is served from memory (still present after the
        // first read populated it).
        assert!(store.get_session(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn writes_survive_restart() {
        let dir = TempDir::new().unwrap();
        let id;
        {
            let store = HybridStore::new(dir.path(), StoreConfig::default());
            id = store
                .create_session("coding", MetadataMap::new())
                .await
                .unwrap()
                .session_id;
            store
                .add_processing_event(ProcessingEvent::new(
                    id.clone(),
                    "prompt",
                    serde_json::json!({}),
                ))
                .await
                .unwrap();
        }
        let store = HybridStore::new(dir.path(), StoreConfig::default());
        assert!(store.get_session(&id).await.unwrap().is_some());
        assert_eq!(store.get_processing_history(&id, None).await.unwrap().len(), 1);
    }
}
