//! Request and Response — the runtime's outermost boundary types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::classify::{ClassificationMethod, InputKind};
use crate::duration::DurationMs;
use crate::error::AgentError;
use crate::id::SessionId;

/// Free-form metadata attached to responses, classifications, and events.
pub type MetadataMap = serde_json::Map<String, serde_json::Value>;

/// An accepted unit of work. Immutable once accepted: the dispatcher
/// never mutates a request, it only derives state from it.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Free-form user text.
    pub input: String,
    /// Where and when the request came from.
    pub context: RequestContext,
    /// Per-request overrides.
    #[serde(default)]
    pub options: RequestOptions,
}

/// Origin information for a request.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// The session this request belongs to. Created on first use.
    pub session_id: SessionId,
    /// Where the request came from (cli, api, test).
    pub source: String,
    /// When the request was accepted.
    pub timestamp: DateTime<Utc>,
    /// Caller-supplied environment (cwd, shell, editor state).
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

/// Optional per-request overrides. Every field defaults to "use the
/// dispatcher's configuration".
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Force a specific classification method for this request.
    pub method: Option<ClassificationMethod>,
    /// Opaque metadata that passes through to the response unchanged.
    #[serde(default)]
    pub metadata: MetadataMap,
}

impl Request {
    /// Create a request with the given input and session, stamped now.
    pub fn new(input: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            input: input.into(),
            context: RequestContext {
                session_id,
                source: "api".to_string(),
                timestamp: Utc::now(),
                environment: HashMap::new(),
            },
            options: RequestOptions::default(),
        }
    }
}

/// The unified result shape every handler produces.
///
/// `metadata` always carries at least `classification` (kind, confidence,
/// method) and per-phase timings; workflow responses additionally carry
/// `workflow_id`, `execution_path`, and `node_count`.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Whether the handler completed successfully.
    pub success: bool,
    /// Human-readable response content.
    pub content: String,
    /// Which handler produced this response.
    pub kind: InputKind,
    /// Classifier confidence for the routing decision, in `[0, 1]`.
    pub confidence: f64,
    /// Wall-clock time spent processing the request.
    pub execution_time: DurationMs,
    /// Names of tools invoked while handling the request.
    #[serde(default)]
    pub tools_used: Vec<String>,
    /// Structured response metadata.
    #[serde(default)]
    pub metadata: MetadataMap,
    /// Short error description when `success` is false.
    pub error: Option<String>,
}

impl Response {
    /// A successful response with empty metadata.
    pub fn ok(kind: InputKind, content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            kind,
            confidence: 0.0,
            execution_time: DurationMs::ZERO,
            tools_used: vec![],
            metadata: MetadataMap::new(),
            error: None,
        }
    }

    /// An error response. The human-readable message goes into `content`;
    /// the machine-readable code and category land in metadata.
    pub fn from_error(kind: InputKind, error: &AgentError) -> Self {
        let mut metadata = MetadataMap::new();
        metadata.insert("error_code".into(), error.code.clone().into());
        metadata.insert(
            "error_category".into(),
            serde_json::to_value(error.category).unwrap_or_default(),
        );
        if !error.context.is_null() {
            metadata.insert("error_context".into(), error.context.clone());
        }
        Self {
            success: false,
            content: error.message.clone(),
            kind,
            confidence: 0.0,
            execution_time: DurationMs::ZERO,
            tools_used: vec![],
            metadata,
            error: Some(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;

    #[test]
    fn error_response_carries_machine_readable_form() {
        let e = AgentError::business(codes::INPUT_BLOCKED, "blocked by rule sql_injection");
        let resp = Response::from_error(InputKind::Workflow, &e);
        assert!(!resp.success);
        assert_eq!(resp.metadata["error_code"], codes::INPUT_BLOCKED);
        assert_eq!(resp.metadata["error_category"], "business");
        assert_eq!(resp.content, "blocked by rule sql_injection");
    }

    #[test]
    fn request_serde_roundtrip() {
        let req = Request::new("hello", SessionId::new("s-1"));
        let json = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(back.input, "hello");
        assert_eq!(back.context.session_id, SessionId::new("s-1"));
    }
}
