//! The single error type that crosses component boundaries.
//!
//! Every public operation in the runtime returns `Result<T, AgentError>`.
//! Components may keep richer internal error types, but they convert at
//! their boundary. Nothing panics across a component seam, and the only
//! ambient catch lives at the process entry point.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::DurationMs;

/// Broad failure taxonomy. Drives retry decisions, CLI exit codes, and
/// the machine-readable half of an error Response.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad input: schema mismatch, unknown command, unknown mode.
    Validation,
    /// Missing or misconfigured component: unknown provider, absent handler.
    Configuration,
    /// Timeout, cancellation, internal inconsistency.
    System,
    /// Upstream unreachable, model backend failure.
    Network,
    /// Security block, rate limit, permission denied.
    Business,
}

/// Well-known error codes. Components are free to mint their own codes;
/// these are the ones other components match on.
pub mod codes {
    /// A deadline elapsed before the operation finished.
    pub const OPERATION_TIMEOUT: &str = "OPERATION_TIMEOUT";
    /// The caller cancelled the operation.
    pub const CANCELLED: &str = "CANCELLED";
    /// Tool input failed JSON Schema validation.
    pub const VALIDATION: &str = "VALIDATION";
    /// A tool's permission check denied the call.
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    /// Too many calls inside the rate-limit window.
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    /// The `(session, tool)` key is inside a block period.
    pub const RATE_LIMIT_BLOCKED: &str = "RATE_LIMIT_BLOCKED";
    /// A sanitisation rule with `action = block` matched the input.
    pub const INPUT_BLOCKED: &str = "INPUT_BLOCKED";
    /// An output-filter rule with `action = block` matched the result.
    pub const OUTPUT_BLOCKED: &str = "OUTPUT_BLOCKED";
    /// The named tool is not registered.
    pub const TOOL_NOT_FOUND: &str = "TOOL_NOT_FOUND";
    /// The named session does not exist.
    pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
    /// The requested model provider is not registered.
    pub const PROVIDER_NOT_FOUND: &str = "PROVIDER_NOT_FOUND";
    /// The backend lacks a capability the request requires.
    pub const CAPABILITY_MISSING: &str = "CAPABILITY_MISSING";
}

/// The cross-boundary error. Tagged with a stable `code` for machine
/// dispatch, a `category` for the taxonomy, and a free-form `context`
/// object for structured detail (remaining block time, failing field,
/// phase name).
#[non_exhaustive]
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("[{code}] {message}")]
pub struct AgentError {
    /// Stable machine-readable code (SCREAMING_SNAKE).
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Which part of the taxonomy this failure belongs to.
    pub category: ErrorCategory,
    /// Structured detail. `Null` when there is nothing useful to attach.
    #[serde(default)]
    pub context: serde_json::Value,
}

impl AgentError {
    /// Build an error with an explicit code and category.
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        category: ErrorCategory,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            category,
            context: serde_json::Value::Null,
        }
    }

    /// Attach structured context, replacing any existing context.
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// A validation failure.
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, ErrorCategory::Validation)
    }

    /// A configuration failure.
    pub fn configuration(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, ErrorCategory::Configuration)
    }

    /// A system failure.
    pub fn system(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, ErrorCategory::System)
    }

    /// A network failure.
    pub fn network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, ErrorCategory::Network)
    }

    /// A business-rule failure (security block, permission denied).
    pub fn business(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, ErrorCategory::Business)
    }

    /// The distinguished timeout error: the named phase ran past its limit.
    pub fn timeout(phase: &str, limit: DurationMs) -> Self {
        Self::system(
            codes::OPERATION_TIMEOUT,
            format!("{phase} exceeded {limit}"),
        )
        .with_context(serde_json::json!({ "phase": phase, "limit_ms": limit.as_millis() }))
    }

    /// The distinguished cancellation error.
    pub fn cancelled(phase: &str) -> Self {
        Self::system(codes::CANCELLED, format!("{phase} cancelled"))
            .with_context(serde_json::json!({ "phase": phase }))
    }

    /// Whether this is the timeout error.
    pub fn is_timeout(&self) -> bool {
        self.code == codes::OPERATION_TIMEOUT
    }

    /// Whether this is the cancellation error.
    pub fn is_cancelled(&self) -> bool {
        self.code == codes::CANCELLED
    }

    /// Process exit code for this error, per the CLI contract:
    /// validation 2, configuration 3, timeout/cancelled 4, security or
    /// permission block 5, everything else 1.
    pub fn exit_code(&self) -> i32 {
        match self.category {
            ErrorCategory::Validation => 2,
            ErrorCategory::Configuration => 3,
            ErrorCategory::System if self.is_timeout() || self.is_cancelled() => 4,
            ErrorCategory::Business => 5,
            _ => 1,
        }
    }
}
