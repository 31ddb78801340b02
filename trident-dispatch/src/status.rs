//! The dispatcher's status surface implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::RwLock;

use keel::{AgentError, DurationMs, SessionStore};
use trident_command::{AgentMode, AgentStatus, StatusSurface};
use trident_tool::ToolRegistry;

/// Shared mutable agent state backing `/status`, `/mode`, `/model`,
/// and `agent health`.
pub struct StatusState {
    started_at: Instant,
    mode: RwLock<AgentMode>,
    model_id: RwLock<String>,
    provider_id: String,
    requests: AtomicU64,
    store: Arc<dyn SessionStore>,
    registry: Arc<ToolRegistry>,
    config_snapshot: serde_json::Value,
}

impl StatusState {
    /// A fresh status surface in `ready` mode.
    pub fn new(
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
        store: Arc<dyn SessionStore>,
        registry: Arc<ToolRegistry>,
        config_snapshot: serde_json::Value,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            mode: RwLock::new(AgentMode::Ready),
            model_id: RwLock::new(model_id.into()),
            provider_id: provider_id.into(),
            requests: AtomicU64::new(0),
            store,
            registry,
            config_snapshot,
        }
    }

    /// Count one processed request.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// The currently selected model id.
    pub async fn model_id(&self) -> String {
        self.model_id.read().await.clone()
    }
}

#[async_trait]
impl StatusSurface for StatusState {
    async fn status(&self) -> AgentStatus {
        let store_stats = self.store.statistics().await.unwrap_or_default();
        AgentStatus {
            mode: *self.mode.read().await,
            model_id: self.model_id.read().await.clone(),
            provider_id: self.provider_id.clone(),
            uptime: DurationMs::from(self.started_at.elapsed()),
            requests_processed: self.requests.load(Ordering::Relaxed),
            tool_count: self.registry.stats().await.total,
            store: store_stats,
        }
    }

    async fn set_mode(&self, mode: AgentMode) -> Result<(), AgentError> {
        *self.mode.write().await = mode;
        Ok(())
    }

    async fn set_model(&self, model_id: &str) -> Result<(), AgentError> {
        if model_id.trim().is_empty() {
            return Err(AgentError::validation("EMPTY_MODEL", "model id is empty"));
        }
        *self.model_id.write().await = model_id.to_string();
        Ok(())
    }

    async fn config_snapshot(&self) -> serde_json::Value {
        self.config_snapshot.clone()
    }
}
