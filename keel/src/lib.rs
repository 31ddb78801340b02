//! # keel — protocol types and traits for the trident agent runtime
//!
//! This crate defines every type and trait that crosses a component
//! boundary in the runtime. Implementation crates depend on keel and on
//! nothing else in the workspace; the dispatcher is the only place the
//! concrete pieces meet.
//!
//! ## The boundaries
//!
//! | Boundary | Types/traits | What it does |
//! |----------|--------------|--------------|
//! | Errors | [`AgentError`], [`ErrorCategory`] | The single cross-boundary error channel |
//! | Requests | [`Request`], [`Response`] | The runtime's outer surface |
//! | Classification | [`ClassificationResult`], [`InputKind`] | The three-way routing decision |
//! | Tools | [`Tool`], [`ToolCall`], [`ToolResult`] | Object-safe tool abstraction |
//! | Gateway | [`ToolGateway`] | The narrow seam workflows use to reach tools |
//! | Models | [`ModelBackend`], [`ModelRequest`] | Uniform invoke/stream over LLM backends |
//! | Sessions | [`SessionStore`], [`Session`] | Conversation history, state, event log |
//! | Workflows | [`WorkflowSpec`], [`WorkflowState`] | Graph shape and the state reducer |
//!
//! ## Design principle
//!
//! Traits here are operation-defined, not mechanism-defined:
//! [`ToolGateway::run_tool`] means "cause this call to be executed under
//! the full pipeline", whether that pipeline lives in-process or behind
//! a network hop. That is what keeps the workflow engine ignorant of the
//! registry, executor, and security layer it is actually driving.

#![deny(missing_docs)]

pub mod classify;
pub mod duration;
pub mod error;
pub mod gateway;
pub mod id;
pub mod model;
pub mod request;
pub mod session;
pub mod tool;
pub mod workflow;

#[cfg(feature = "test-utils")]
pub mod test_utils;

// Re-exports for convenience
pub use classify::{ClassificationMethod, ClassificationResult, InputKind};
pub use duration::DurationMs;
pub use error::{codes, AgentError, ErrorCategory};
pub use gateway::ToolGateway;
pub use id::{CallId, EventId, SessionId, TurnId, WorkflowId};
pub use model::{
    FinishReason, ModelBackend, ModelCapabilities, ModelChunk, ModelConfiguration, ModelMessage,
    ModelRequest, ModelResponse, ModelRole, ModelStream, TokenUsage,
};
pub use request::{MetadataMap, Request, RequestContext, RequestOptions, Response};
pub use session::{
    CleanupReport, ConversationState, ProcessingEvent, Session, SessionStore, SessionTurn,
    StoreStatistics, TurnRole,
};
pub use tool::{Tool, ToolCall, ToolContext, ToolFuture, ToolMetrics, ToolResult};
pub use workflow::{
    EdgeSpec, NodeKind, NodeSpec, Pattern, StateMeta, StatePatch, WorkflowSpec, WorkflowState,
};
