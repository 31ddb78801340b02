//! Built-in command dispatch.

use std::sync::Arc;

use keel::{AgentError, MetadataMap, SessionId, SessionStore};

use crate::parse::ParsedCommand;
use crate::status::{AgentMode, StatusSurface};

/// Outcome of one command execution.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// The command that ran.
    pub command_name: String,
    /// Human-readable output.
    pub content: String,
    /// Structured detail for the response metadata.
    pub metadata: MetadataMap,
}

impl CommandOutcome {
    fn new(command_name: &str, content: String) -> Self {
        Self {
            command_name: command_name.to_string(),
            content,
            metadata: MetadataMap::new(),
        }
    }
}

/// Names the dispatcher short-circuits without classification.
pub const BUILTIN_COMMANDS: &[&str] = &["status", "model", "config", "mode", "session"];

/// Dispatches parsed commands to built-ins. Built-ins read the session
/// store and the status surface only; no tool access exists here.
pub struct CommandHandler {
    store: Arc<dyn SessionStore>,
    status: Arc<dyn StatusSurface>,
}

impl CommandHandler {
    /// A handler over the given store and status surface.
    pub fn new(store: Arc<dyn SessionStore>, status: Arc<dyn StatusSurface>) -> Self {
        Self { store, status }
    }

    /// Whether `name` is a built-in.
    pub fn is_builtin(name: &str) -> bool {
        BUILTIN_COMMANDS.contains(&name)
    }

    /// Execute a parsed command for a session.
    pub async fn execute(
        &self,
        command: ParsedCommand,
        session_id: &SessionId,
    ) -> Result<CommandOutcome, AgentError> {
        match command.name.as_str() {
            "status" => self.cmd_status(session_id).await,
            "model" => self.cmd_model(&command).await,
            "config" => self.cmd_config().await,
            "mode" => self.cmd_mode(&command).await,
            "session" => self.cmd_session(session_id).await,
            other => Err(AgentError::validation(
                "UNKNOWN_COMMAND",
                format!("unknown command: /{other}"),
            )),
        }
    }

    async fn cmd_status(&self, session_id: &SessionId) -> Result<CommandOutcome, AgentError> {
        let status = self.status.status().await;
        let turns = self
            .store
            .get_session(session_id)
            .await?
            .map(|s| s.history.len())
            .unwrap_or(0);
        let content = format!(
            "Mode: {}\nModel: {} ({})\nSession: {session_id} ({turns} turns)\nUptime: {}\nRequests: {}\nTools: {}\nSessions: {}",
            status.mode,
            status.model_id,
            status.provider_id,
            status.uptime,
            status.requests_processed,
            status.tool_count,
            status.store.sessions,
        );
        let mut outcome = CommandOutcome::new("status", content);
        outcome.metadata.insert(
            "status".into(),
            serde_json::to_value(&status).unwrap_or_default(),
        );
        Ok(outcome)
    }

    async fn cmd_model(&self, command: &ParsedCommand) -> Result<CommandOutcome, AgentError> {
        match command.positional.first() {
            Some(model_id) => {
                self.status.set_model(model_id).await?;
                Ok(CommandOutcome::new(
                    "model",
                    format!("Model set to {model_id}"),
                ))
            }
            None => {
                let status = self.status.status().await;
                Ok(CommandOutcome::new(
                    "model",
                    format!("Model: {} ({})", status.model_id, status.provider_id),
                ))
            }
        }
    }

    async fn cmd_config(&self) -> Result<CommandOutcome, AgentError> {
        let snapshot = self.status.config_snapshot().await;
        let rendered = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| AgentError::system("SERIALIZE_FAILED", e.to_string()))?;
        let mut outcome = CommandOutcome::new("config", rendered);
        outcome.metadata.insert("config".into(), snapshot);
        Ok(outcome)
    }

    async fn cmd_mode(&self, command: &ParsedCommand) -> Result<CommandOutcome, AgentError> {
        match command.positional.first() {
            Some(raw) => {
                let mode = AgentMode::parse(raw).ok_or_else(|| {
                    AgentError::validation("UNKNOWN_MODE", format!("unknown mode: {raw}"))
                })?;
                self.status.set_mode(mode).await?;
                Ok(CommandOutcome::new("mode", format!("Mode set to {mode}")))
            }
            None => {
                let status = self.status.status().await;
                Ok(CommandOutcome::new(
                    "mode",
                    format!("Mode: {}", status.mode),
                ))
            }
        }
    }

    async fn cmd_session(&self, session_id: &SessionId) -> Result<CommandOutcome, AgentError> {
        let Some(session) = self.store.get_session(session_id).await? else {
            return Ok(CommandOutcome::new(
                "session",
                format!("Session: {session_id} (not yet created)"),
            ));
        };
        let content = format!(
            "Session: {}\nDomain: {}\nCreated: {}\nLast access: {}\nTurns: {}",
            session.session_id,
            session.domain,
            session.created_at.to_rfc3339(),
            session.last_accessed_at.to_rfc3339(),
            session.history.len(),
        );
        let mut outcome = CommandOutcome::new("session", content);
        outcome.metadata.insert(
            "turn_count".into(),
            serde_json::json!(session.history.len()),
        );
        Ok(outcome)
    }
}
