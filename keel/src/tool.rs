//! The Tool protocol — object-safe tool abstraction and call/result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::duration::DurationMs;
use crate::error::AgentError;
use crate::id::{CallId, SessionId, WorkflowId};
use crate::request::MetadataMap;

/// Boxed future returned by object-safe tool methods.
pub type ToolFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AgentError>> + Send + 'a>>;

/// Execution context handed to a tool. Carries identity (which session,
/// which workflow), the caller's environment, and the cancellation
/// signal a long-running tool is expected to observe.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContext {
    /// The session on whose behalf the tool runs.
    pub session_id: SessionId,
    /// The enclosing workflow execution, if any.
    pub workflow_id: Option<WorkflowId>,
    /// Caller environment (cwd, shell, editor state).
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Cooperative cancellation. Not serialized: a deserialized context
    /// gets a fresh, never-cancelled token.
    #[serde(skip, default)]
    pub cancellation: tokio_util::sync::CancellationToken,
}

impl ToolContext {
    /// A context for the given session with a fresh cancellation token.
    pub fn for_session(session_id: SessionId) -> Self {
        Self {
            session_id,
            workflow_id: None,
            environment: HashMap::new(),
            cancellation: tokio_util::sync::CancellationToken::new(),
        }
    }
}

/// One requested tool invocation.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique id for this call, echoed on the result.
    pub call_id: CallId,
    /// Registry name of the tool to invoke.
    pub tool_name: String,
    /// Tool input, validated against the tool's schema before execution.
    pub input: serde_json::Value,
    /// Execution context.
    pub context: ToolContext,
    /// When the call was created.
    pub timestamp: DateTime<Utc>,
}

impl ToolCall {
    /// Create a call with a fresh id, stamped now.
    pub fn new(tool_name: impl Into<String>, input: serde_json::Value, context: ToolContext) -> Self {
        Self {
            call_id: CallId::generate(),
            tool_name: tool_name.into(),
            input,
            context,
            timestamp: Utc::now(),
        }
    }
}

/// Timing metrics for one tool call. `ended_at` is never before
/// `started_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetrics {
    /// When execution began.
    pub started_at: DateTime<Utc>,
    /// When execution finished (success or failure).
    pub ended_at: DateTime<Utc>,
}

impl ToolMetrics {
    /// Elapsed wall-clock time.
    pub fn duration(&self) -> DurationMs {
        let ms = (self.ended_at - self.started_at).num_milliseconds().max(0) as u64;
        DurationMs::from_millis(ms)
    }
}

/// The outcome of one tool call. Exactly one of `output` / `error` is
/// populated; use [`ToolResult::ok`] / [`ToolResult::failed`] rather
/// than building the struct by hand.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Echoes the call's id.
    pub call_id: CallId,
    /// Echoes the call's tool name.
    pub tool_name: String,
    /// Whether the tool succeeded.
    pub success: bool,
    /// Tool output on success.
    pub output: Option<serde_json::Value>,
    /// Error description on failure.
    pub error: Option<String>,
    /// Timing metrics.
    pub metrics: ToolMetrics,
    /// Executor- and gateway-attached metadata (sanitisation marks,
    /// redaction marks).
    #[serde(default)]
    pub metadata: MetadataMap,
}

impl ToolResult {
    /// A successful result.
    pub fn ok(call: &ToolCall, output: serde_json::Value, metrics: ToolMetrics) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            success: true,
            output: Some(output),
            error: None,
            metrics,
            metadata: MetadataMap::new(),
        }
    }

    /// A failed result.
    pub fn failed(call: &ToolCall, error: impl Into<String>, metrics: ToolMetrics) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            success: false,
            output: None,
            error: Some(error.into()),
            metrics,
            metadata: MetadataMap::new(),
        }
    }
}

/// Object-safe trait for tool implementations.
///
/// Any tool source (process spawn, filesystem access, HTTP endpoint)
/// implements this trait; the registry stores tools as `Arc<dyn Tool>`.
/// Tools must be deterministic over their declared inputs modulo the
/// external side effects they document. An implementation reporting
/// `is_concurrency_safe() == false` is never invoked in parallel with
/// itself for the same session; the batch executor serialises it.
pub trait Tool: Send + Sync {
    /// The tool's unique registry name.
    fn name(&self) -> &str;

    /// Implementation version string.
    fn version(&self) -> &str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> serde_json::Value;

    /// Whether the tool has no observable side effects.
    fn is_read_only(&self) -> bool;

    /// Whether parallel invocations for one session are safe.
    fn is_concurrency_safe(&self) -> bool;

    /// Execute the tool. The implementation should poll
    /// `ctx.cancellation` at its own suspension points.
    fn execute(&self, ctx: ToolContext, input: serde_json::Value)
        -> ToolFuture<'_, serde_json::Value>;

    /// Check whether this call is permitted. `Err` means deny; the
    /// executor converts it to an `UNAUTHORIZED` failure.
    fn check_permissions<'a>(
        &'a self,
        ctx: &'a ToolContext,
        input: &'a serde_json::Value,
    ) -> ToolFuture<'a, ()>;

    /// Release tool-owned resources. Runs on unregister and at process
    /// shutdown. The default implementation is a no-op.
    fn cleanup(&self) -> ToolFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
