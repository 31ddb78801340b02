//! The ToolGateway seam.
//!
//! The workflow engine never sees the registry, the executor, or the
//! security layer. It depends on this narrow facade, which keeps the
//! dependency graph acyclic: tools are invoked inside workflows that
//! live inside the dispatcher, and only the dispatcher composes the
//! concrete pieces.

use async_trait::async_trait;

use crate::error::AgentError;
use crate::tool::{ToolCall, ToolResult};

/// Facade over registry + executor + security.
///
/// `run_tool` applies the full call pipeline (rate limit, input
/// sanitisation, validation, permissions, execution, output filtering).
/// `run_batch` additionally partitions by concurrency safety and fails
/// fast on the first error while returning partial results in the error
/// context.
#[async_trait]
pub trait ToolGateway: Send + Sync {
    /// Execute one tool call through the full pipeline.
    async fn run_tool(&self, call: ToolCall) -> Result<ToolResult, AgentError>;

    /// Execute a batch: concurrency-safe calls in parallel, the rest
    /// sequentially in caller order. Fails fast on the first error.
    async fn run_batch(&self, calls: Vec<ToolCall>) -> Result<Vec<ToolResult>, AgentError>;

    /// Whether a tool with this name is available.
    async fn has_tool(&self, name: &str) -> bool;

    /// Names of all available tools.
    async fn tool_names(&self) -> Vec<String>;
}
