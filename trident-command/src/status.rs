//! The status surface built-ins read from and write to.
//!
//! The dispatcher implements [`StatusSurface`]; built-ins see only this
//! trait, so the command handler never reaches into dispatcher
//! internals (and, by construction, never into tools).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use keel::{AgentError, DurationMs, StoreStatistics};

/// User-facing agent mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Idle, accepting requests.
    Ready,
    /// Planning a task.
    Planning,
    /// Editing files.
    Editing,
    /// Executing a workflow.
    Executing,
    /// A component failed; degraded operation.
    Error,
}

impl AgentMode {
    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            AgentMode::Ready => "ready",
            AgentMode::Planning => "planning",
            AgentMode::Editing => "editing",
            AgentMode::Executing => "executing",
            AgentMode::Error => "error",
        }
    }

    /// Parse a canonical name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(AgentMode::Ready),
            "planning" => Some(AgentMode::Planning),
            "editing" => Some(AgentMode::Editing),
            "executing" => Some(AgentMode::Executing),
            "error" => Some(AgentMode::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A point-in-time snapshot of the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    /// Current mode.
    pub mode: AgentMode,
    /// Active model id.
    pub model_id: String,
    /// Active provider id.
    pub provider_id: String,
    /// Time since the dispatcher started.
    pub uptime: DurationMs,
    /// Requests processed since start.
    pub requests_processed: u64,
    /// Registered tool count.
    pub tool_count: usize,
    /// Session store counters.
    pub store: StoreStatistics,
}

/// Read/write access to the agent's externally visible state.
#[async_trait]
pub trait StatusSurface: Send + Sync {
    /// Snapshot the agent's status.
    async fn status(&self) -> AgentStatus;

    /// Switch the agent mode.
    async fn set_mode(&self, mode: AgentMode) -> Result<(), AgentError>;

    /// Switch the active model id.
    async fn set_model(&self, model_id: &str) -> Result<(), AgentError>;

    /// The agent's effective configuration as JSON, for `/config`.
    async fn config_snapshot(&self) -> serde_json::Value;
}
