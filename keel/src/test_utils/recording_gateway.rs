//! RecordingGateway — canned tool outputs, recorded calls.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::AgentError;
use crate::gateway::ToolGateway;
use crate::tool::{ToolCall, ToolMetrics, ToolResult};

/// A [`ToolGateway`] fake that returns canned outputs per tool name and
/// records every call it receives. Workflow tests assert against the
/// recorded call sequence instead of wiring a full executor stack.
pub struct RecordingGateway {
    responses: HashMap<String, serde_json::Value>,
    calls: Mutex<Vec<ToolCall>>,
}

impl RecordingGateway {
    /// A gateway with the given canned responses.
    pub fn new(responses: HashMap<String, serde_json::Value>) -> Self {
        Self {
            responses,
            calls: Mutex::new(vec![]),
        }
    }

    /// A gateway that answers every tool with `{"ok": true}`.
    pub fn permissive(tool_names: &[&str]) -> Self {
        Self::new(
            tool_names
                .iter()
                .map(|n| (n.to_string(), serde_json::json!({"ok": true})))
                .collect(),
        )
    }

    /// The calls recorded so far, in arrival order.
    pub fn recorded_calls(&self) -> Vec<ToolCall> {
        self.calls.lock().expect("gateway lock").clone()
    }
}

#[async_trait]
impl ToolGateway for RecordingGateway {
    async fn run_tool(&self, call: ToolCall) -> Result<ToolResult, AgentError> {
        self.calls.lock().expect("gateway lock").push(call.clone());
        let now = chrono::Utc::now();
        let metrics = ToolMetrics {
            started_at: now,
            ended_at: now,
        };
        match self.responses.get(&call.tool_name) {
            Some(output) => Ok(ToolResult::ok(&call, output.clone(), metrics)),
            None => Ok(ToolResult::failed(
                &call,
                format!("tool not found: {}", call.tool_name),
                metrics,
            )),
        }
    }

    async fn run_batch(&self, calls: Vec<ToolCall>) -> Result<Vec<ToolResult>, AgentError> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.run_tool(call).await?);
        }
        Ok(results)
    }

    async fn has_tool(&self, name: &str) -> bool {
        self.responses.contains_key(name)
    }

    async fn tool_names(&self) -> Vec<String> {
        self.responses.keys().cloned().collect()
    }
}
