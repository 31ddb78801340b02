//! The in-process [`ToolGateway`] implementation.
//!
//! Wires security in front of and behind the executor: rate-limit,
//! sanitise input, execute, filter output. This is the only path
//! workflows use to reach tools.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use keel::{AgentError, CallId, SessionId, ToolCall, ToolGateway, ToolResult};
use trident_security::SecurityGateway;
use trident_tool::ToolRegistry;

use crate::executor::{ExecuteOptions, ToolExecutor};

/// Registry + executor + security, behind the narrow gateway seam.
pub struct LocalToolGateway {
    registry: Arc<ToolRegistry>,
    executor: ToolExecutor,
    security: Arc<SecurityGateway>,
}

impl LocalToolGateway {
    /// Compose the gateway from its parts. The registry handle must be
    /// the same one the executor runs against.
    pub fn new(
        registry: Arc<ToolRegistry>,
        executor: ToolExecutor,
        security: Arc<SecurityGateway>,
    ) -> Self {
        Self {
            registry,
            executor,
            security,
        }
    }

    /// Controls 1 and 2: rate limit, then sanitise the input in place.
    async fn secure_call(&self, mut call: ToolCall) -> Result<ToolCall, AgentError> {
        let category = self
            .registry
            .category_of(&call.tool_name)
            .await
            .unwrap_or_else(|| "default".to_string());
        self.security
            .check_rate_limit(&call.context.session_id, &call.tool_name, &category)?;
        let sanitized = self
            .security
            .sanitize_input(&call.context.session_id, &call.tool_name, &call.input)?;
        if sanitized != call.input {
            debug!(tool = %call.tool_name, "input sanitised");
            call.input = sanitized;
        }
        Ok(call)
    }

    /// Control 3: filter the result's output, marking redactions.
    fn filter_result(
        &self,
        session: &SessionId,
        mut result: ToolResult,
    ) -> Result<ToolResult, AgentError> {
        let Some(output) = result.output.take() else {
            return Ok(result);
        };
        let filtered = self
            .security
            .filter_output(session, &result.tool_name, &output)?;
        if filtered != output {
            result.metadata.insert("redacted".to_string(), true.into());
        }
        result.output = Some(filtered);
        Ok(result)
    }
}

#[async_trait]
impl ToolGateway for LocalToolGateway {
    async fn run_tool(&self, call: ToolCall) -> Result<ToolResult, AgentError> {
        let session = call.context.session_id.clone();
        let call = self.secure_call(call).await?;
        let result = self
            .executor
            .execute(call, ExecuteOptions::default())
            .await?;
        self.filter_result(&session, result)
    }

    async fn run_batch(&self, calls: Vec<ToolCall>) -> Result<Vec<ToolResult>, AgentError> {
        let mut sessions: HashMap<CallId, SessionId> = HashMap::new();
        let mut secured = Vec::with_capacity(calls.len());
        for call in calls {
            sessions.insert(call.call_id.clone(), call.context.session_id.clone());
            secured.push(self.secure_call(call).await?);
        }
        let results = self.executor.execute_batch(secured).await?;
        results
            .into_iter()
            .map(|result| {
                let session = sessions
                    .get(&result.call_id)
                    .cloned()
                    .unwrap_or_else(|| SessionId::new(""));
                self.filter_result(&session, result)
            })
            .collect()
    }

    async fn has_tool(&self, name: &str) -> bool {
        self.registry.has(name).await
    }

    async fn tool_names(&self) -> Vec<String> {
        self.registry.names().await
    }
}
