//! Canned tool implementations for executor and workflow tests.

use serde_json::json;

use crate::tool::{Tool, ToolContext, ToolFuture};

/// Echoes its input back, wrapped in `{"echoed": ...}`. Read-only and
/// concurrency-safe.
pub struct EchoTool;

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn description(&self) -> &str {
        "Echoes input back"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    fn is_read_only(&self) -> bool {
        true
    }
    fn is_concurrency_safe(&self) -> bool {
        true
    }
    fn execute(&self, _ctx: ToolContext, input: serde_json::Value) -> ToolFuture<'_, serde_json::Value> {
        Box::pin(async move { Ok(json!({"echoed": input})) })
    }
    fn check_permissions<'a>(
        &'a self,
        _ctx: &'a ToolContext,
        _input: &'a serde_json::Value,
    ) -> ToolFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Always fails with an execution error.
pub struct FailTool;

impl Tool for FailTool {
    fn name(&self) -> &str {
        "fail"
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    fn is_read_only(&self) -> bool {
        true
    }
    fn is_concurrency_safe(&self) -> bool {
        true
    }
    fn execute(&self, _ctx: ToolContext, _input: serde_json::Value) -> ToolFuture<'_, serde_json::Value> {
        Box::pin(async {
            Err(crate::error::AgentError::system(
                "TOOL_FAILED",
                "always fails",
            ))
        })
    }
    fn check_permissions<'a>(
        &'a self,
        _ctx: &'a ToolContext,
        _input: &'a serde_json::Value,
    ) -> ToolFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Sleeps for a configured time, then returns `{"slept_ms": n}`.
/// Observes cancellation while sleeping. Declare it concurrency-unsafe
/// to exercise the batch executor's serialisation path.
pub struct SleepTool {
    /// How long each call sleeps.
    pub millis: u64,
    /// What the tool reports for `is_concurrency_safe`.
    pub concurrency_safe: bool,
}

impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn description(&self) -> &str {
        "Sleeps then returns"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    fn is_read_only(&self) -> bool {
        true
    }
    fn is_concurrency_safe(&self) -> bool {
        self.concurrency_safe
    }
    fn execute(&self, ctx: ToolContext, _input: serde_json::Value) -> ToolFuture<'_, serde_json::Value> {
        let millis = self.millis;
        Box::pin(async move {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(millis)) => {
                    Ok(json!({"slept_ms": millis}))
                }
                _ = ctx.cancellation.cancelled() => {
                    Err(crate::error::AgentError::cancelled("sleep tool"))
                }
            }
        })
    }
    fn check_permissions<'a>(
        &'a self,
        _ctx: &'a ToolContext,
        _input: &'a serde_json::Value,
    ) -> ToolFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}
