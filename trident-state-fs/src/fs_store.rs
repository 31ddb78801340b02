//! File-backed session store.
//!
//! Directory layout, one JSON file per session id:
//!
//! ```text
//! root/
//!   sessions/<id>.json
//!   conversations/<id>.json
//!   events/<id>.json
//! ```
//!
//! Every mutation is durable before the operation returns: content is
//! written to a temp file in the same directory and renamed over the
//! target, so a crash mid-write leaves the previous file intact. Reads
//! populate an in-memory layer on miss.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use keel::{
    codes, AgentError, CleanupReport, ConversationState, MetadataMap, ProcessingEvent, Session,
    SessionId, SessionStore, SessionTurn, StoreStatistics,
};
use trident_state_memory::StoreConfig;

/// Encode a session id into a safe filename.
fn id_to_filename(id: &SessionId) -> String {
    let mut encoded = String::new();
    for ch in id.as_str().chars() {
        match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => encoded.push(ch),
            _ => {
                for byte in ch.to_string().as_bytes() {
                    encoded.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    format!("{encoded}.json")
}

/// Decode a filename back to a session id.
fn filename_to_id(filename: &str) -> Option<SessionId> {
    let name = filename.strip_suffix(".json")?;
    let mut result = Vec::new();
    let bytes = name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok()?;
            result.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            result.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(result).ok().map(SessionId::new)
}

fn io_error(operation: &str, e: impl std::fmt::Display) -> AgentError {
    AgentError::system("STORE_IO", format!("{operation}: {e}"))
}

struct Cache {
    sessions: HashMap<SessionId, Session>,
    conversations: HashMap<SessionId, ConversationState>,
    events: HashMap<SessionId, VecDeque<ProcessingEvent>>,
}

/// File-backed session store with an in-memory read layer.
pub struct FsStore {
    root: PathBuf,
    config: StoreConfig,
    cache: RwLock<Cache>,
    // Serialises mutations. Coarser than the per-session guarantee the
    // protocol asks for, which is fine: file ops are short.
    write_lock: Mutex<()>,
    shutdown: CancellationToken,
}

impl FsStore {
    /// A store rooted at the given directory. Subdirectories are
    /// created lazily on first write.
    pub fn new(root: &Path, config: StoreConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            config,
            cache: RwLock::new(Cache {
                sessions: HashMap::new(),
                conversations: HashMap::new(),
                events: HashMap::new(),
            }),
            write_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    fn session_path(&self, id: &SessionId) -> PathBuf {
        self.root.join("sessions").join(id_to_filename(id))
    }

    fn conversation_path(&self, id: &SessionId) -> PathBuf {
        self.root.join("conversations").join(id_to_filename(id))
    }

    fn events_path(&self, id: &SessionId) -> PathBuf {
        self.root.join("events").join(id_to_filename(id))
    }

    /// Durable write: temp file in the target directory, then rename.
    async fn write_atomic(&self, path: &Path, json: &str) -> Result<(), AgentError> {
        let dir = path.parent().ok_or_else(|| {
            AgentError::system("STORE_IO", format!("no parent for {}", path.display()))
        })?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| io_error("create store directory", e))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| io_error("write temp file", e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| io_error("rename temp file", e))?;
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &Path,
    ) -> Result<Option<T>, AgentError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map(Some)
                .map_err(|e| AgentError::system("STORE_CORRUPT", format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read store file", e)),
        }
    }

    async fn persist_session(&self, session: &Session) -> Result<(), AgentError> {
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| AgentError::system("SERIALIZE_FAILED", e.to_string()))?;
        self.write_atomic(&self.session_path(&session.session_id), &json)
            .await
    }

    /// Cache hit, or load from disk populating the cache.
    async fn load_session(&self, id: &SessionId) -> Result<Option<Session>, AgentError> {
        if let Some(session) = self.cache.read().await.sessions.get(id) {
            return Ok(Some(session.clone()));
        }
        let Some(session) = self.read_json::<Session>(&self.session_path(id)).await? else {
            return Ok(None);
        };
        debug!(session = %id, "session loaded from disk");
        self.cache
            .write()
            .await
            .sessions
            .insert(id.clone(), session.clone());
        Ok(Some(session))
    }

    async fn store_session(&self, session: Session) -> Result<(), AgentError> {
        self.persist_session(&session).await?;
        self.cache
            .write()
            .await
            .sessions
            .insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn load_events(&self, id: &SessionId) -> Result<VecDeque<ProcessingEvent>, AgentError> {
        if let Some(log) = self.cache.read().await.events.get(id) {
            return Ok(log.clone());
        }
        let log: VecDeque<ProcessingEvent> = self
            .read_json::<Vec<ProcessingEvent>>(&self.events_path(id))
            .await?
            .map(VecDeque::from)
            .unwrap_or_default();
        self.cache.write().await.events.insert(id.clone(), log.clone());
        Ok(log)
    }

    /// Session ids present on disk.
    async fn disk_session_ids(&self) -> Result<Vec<SessionId>, AgentError> {
        self.disk_ids("sessions").await
    }

    async fn disk_ids(&self, subdir: &str) -> Result<Vec<SessionId>, AgentError> {
        let dir = self.root.join(subdir);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(io_error("read store directory", e)),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("read store directory", e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".json") {
                    if let Some(id) = filename_to_id(name) {
                        ids.push(id);
                    }
                }
            }
        }
        Ok(ids)
    }

    async fn remove_all_files(&self, id: &SessionId) -> Result<(), AgentError> {
        for path in [
            self.session_path(id),
            self.conversation_path(id),
            self.events_path(id),
        ] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error("remove store file", e)),
            }
        }
        let mut cache = self.cache.write().await;
        cache.sessions.remove(id);
        cache.conversations.remove(id);
        cache.events.remove(id);
        Ok(())
    }

    fn expired(&self, session: &Session) -> bool {
        let ttl = ChronoDuration::milliseconds(self.config.session_ttl.as_millis() as i64);
        Utc::now() - session.last_accessed_at > ttl
    }
}

#[async_trait]
impl SessionStore for FsStore {
    async fn create_session(
        &self,
        domain: &str,
        metadata: MetadataMap,
    ) -> Result<Session, AgentError> {
        let _guard = self.write_lock.lock().await;
        let mut session = Session::new(SessionId::generate(), domain);
        session.metadata = metadata;
        self.store_session(session.clone()).await?;
        info!(session = %session.session_id, domain, "session created");
        Ok(session)
    }

    async fn get_or_create_session(
        &self,
        id: &SessionId,
        domain: &str,
    ) -> Result<Session, AgentError> {
        let _guard = self.write_lock.lock().await;
        let mut session = match self.load_session(id).await? {
            Some(session) => session,
            None => Session::new(id.clone(), domain),
        };
        session.last_accessed_at = Utc::now();
        self.store_session(session.clone()).await?;
        Ok(session)
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, AgentError> {
        let _guard = self.write_lock.lock().await;
        let Some(mut session) = self.load_session(id).await? else {
            return Ok(None);
        };
        session.last_accessed_at = Utc::now();
        self.store_session(session.clone()).await?;
        Ok(Some(session))
    }

    async fn update_session(
        &self,
        id: &SessionId,
        metadata: MetadataMap,
    ) -> Result<Session, AgentError> {
        let _guard = self.write_lock.lock().await;
        let mut session = self.load_session(id).await?.ok_or_else(|| {
            AgentError::validation(codes::SESSION_NOT_FOUND, format!("unknown session: {id}"))
        })?;
        session.metadata.extend(metadata);
        session.last_accessed_at = Utc::now();
        self.store_session(session.clone()).await?;
        Ok(session)
    }

    async fn delete_session(&self, id: &SessionId) -> Result<(), AgentError> {
        let _guard = self.write_lock.lock().await;
        self.remove_all_files(id).await
    }

    async fn append_turn(&self, id: &SessionId, turn: SessionTurn) -> Result<(), AgentError> {
        let _guard = self.write_lock.lock().await;
        let mut session = self.load_session(id).await?.ok_or_else(|| {
            AgentError::validation(codes::SESSION_NOT_FOUND, format!("unknown session: {id}"))
        })?;
        session.history.push(turn);
        if session.history.len() > self.config.max_history_size {
            let overflow = session.history.len() - self.config.max_history_size;
            session.history.drain(..overflow);
        }
        session.last_accessed_at = Utc::now();
        self.store_session(session).await
    }

    async fn save_conversation_state(&self, state: ConversationState) -> Result<(), AgentError> {
        let _guard = self.write_lock.lock().await;
        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| AgentError::system("SERIALIZE_FAILED", e.to_string()))?;
        self.write_atomic(&self.conversation_path(&state.session_id), &json)
            .await?;
        self.cache
            .write()
            .await
            .conversations
            .insert(state.session_id.clone(), state);
        Ok(())
    }

    async fn get_conversation_state(
        &self,
        id: &SessionId,
    ) -> Result<Option<ConversationState>, AgentError> {
        if let Some(state) = self.cache.read().await.conversations.get(id) {
            return Ok(Some(state.clone()));
        }
        let Some(state) = self
            .read_json::<ConversationState>(&self.conversation_path(id))
            .await?
        else {
            return Ok(None);
        };
        self.cache
            .write()
            .await
            .conversations
            .insert(id.clone(), state.clone());
        Ok(Some(state))
    }

    async fn add_processing_event(&self, event: ProcessingEvent) -> Result<(), AgentError> {
        let _guard = self.write_lock.lock().await;
        let id = event.session_id.clone();
        let mut log = self.load_events(&id).await?;
        if log.len() == self.config.max_events_per_session {
            log.pop_front();
        }
        log.push_back(event);
        let as_vec: Vec<&ProcessingEvent> = log.iter().collect();
        let json = serde_json::to_string_pretty(&as_vec)
            .map_err(|e| AgentError::system("SERIALIZE_FAILED", e.to_string()))?;
        self.write_atomic(&self.events_path(&id), &json).await?;
        self.cache.write().await.events.insert(id, log);
        Ok(())
    }

    async fn get_processing_history(
        &self,
        id: &SessionId,
        limit: Option<usize>,
    ) -> Result<Vec<ProcessingEvent>, AgentError> {
        let log = self.load_events(id).await?;
        let newest_first = log.iter().rev();
        Ok(match limit {
            Some(n) => newest_first.take(n).cloned().collect(),
            None => newest_first.cloned().collect(),
        })
    }

    async fn cleanup(&self) -> Result<CleanupReport, AgentError> {
        let _guard = self.write_lock.lock().await;
        let mut report = CleanupReport::default();

        let mut live: Vec<Session> = Vec::new();
        for id in self.disk_session_ids().await? {
            match self.load_session(&id).await? {
                Some(session) if self.expired(&session) => {
                    self.remove_all_files(&id).await?;
                    report.expired_sessions += 1;
                }
                Some(session) => live.push(session),
                None => {}
            }
        }

        if live.len() > self.config.max_sessions {
            live.sort_by_key(|s| s.last_accessed_at);
            let excess = live.len() - self.config.max_sessions;
            for session in live.drain(..excess) {
                self.remove_all_files(&session.session_id).await?;
                report.evicted_sessions += 1;
            }
        }

        let live_ids: Vec<SessionId> = live.iter().map(|s| s.session_id.clone()).collect();
        for id in self.disk_ids("conversations").await? {
            if !live_ids.contains(&id) {
                self.remove_all_files(&id).await?;
                report.orphaned_conversations += 1;
            }
        }
        for id in self.disk_ids("events").await? {
            if !live_ids.contains(&id) {
                self.remove_all_files(&id).await?;
                report.orphaned_event_logs += 1;
            }
        }
        Ok(report)
    }

    async fn shutdown(&self) -> Result<(), AgentError> {
        self.shutdown.cancel();
        Ok(())
    }

    async fn statistics(&self) -> Result<StoreStatistics, AgentError> {
        let mut stats = StoreStatistics::default();
        for id in self.disk_session_ids().await? {
            if let Some(session) = self.load_session(&id).await? {
                stats.sessions += 1;
                stats.oldest_access = Some(match stats.oldest_access {
                    Some(t) if t <= session.last_accessed_at => t,
                    _ => session.last_accessed_at,
                });
                stats.newest_access = Some(match stats.newest_access {
                    Some(t) if t >= session.last_accessed_at => t,
                    _ => session.last_accessed_at,
                });
            }
        }
        stats.conversations = self.disk_ids("conversations").await?.len();
        for id in self.disk_ids("events").await? {
            stats.events += self.load_events(&id).await?.len();
        }
        Ok(stats)
    }
}
