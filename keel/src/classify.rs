//! Classification types — the three-way routing decision.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::request::MetadataMap;

/// The three handler kinds. This enum is deliberately closed (no
/// `Custom` escape hatch): adding a handler means extending this enum
/// and the dispatcher's match together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    /// A slash-command for a built-in.
    Command,
    /// Conversational text for a direct model call.
    Prompt,
    /// A task that needs a multi-step, tool-using workflow.
    Workflow,
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InputKind::Command => "command",
            InputKind::Prompt => "prompt",
            InputKind::Workflow => "workflow",
        };
        f.write_str(s)
    }
}

/// Which classification method produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    /// Deterministic prefix/keyword rules.
    Rule,
    /// A single structured model call.
    Llm,
    /// Rule first, model on low confidence.
    Hybrid,
    /// Three model variants voting.
    Ensemble,
}

impl std::fmt::Display for ClassificationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClassificationMethod::Rule => "rule",
            ClassificationMethod::Llm => "llm",
            ClassificationMethod::Hybrid => "hybrid",
            ClassificationMethod::Ensemble => "ensemble",
        };
        f.write_str(s)
    }
}

/// The outcome of classifying one input.
///
/// Invariants: `confidence` is clamped to `[0, 1]` at construction; when
/// `kind` is `Command`, `extracted` carries `name` and ordered `args`.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// The routing decision.
    pub kind: InputKind,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// The method that produced this result.
    pub method: ClassificationMethod,
    /// Optional explanation (LLM-produced or rule-derived).
    pub reasoning: Option<String>,
    /// Structured extraction: command name/args, matched indicators.
    #[serde(default)]
    pub extracted: HashMap<String, serde_json::Value>,
    /// Method-specific metadata (agreement scores, escalation marks).
    #[serde(default)]
    pub metadata: MetadataMap,
}

impl ClassificationResult {
    /// Build a result, clamping confidence into `[0, 1]`.
    pub fn new(kind: InputKind, confidence: f64, method: ClassificationMethod) -> Self {
        Self {
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            method,
            reasoning: None,
            extracted: HashMap::new(),
            metadata: MetadataMap::new(),
        }
    }

    /// Set the reasoning text.
    #[must_use]
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Add an extracted field.
    #[must_use]
    pub fn with_extracted(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extracted.insert(key.into(), value);
        self
    }

    /// Replace the confidence, re-clamping into `[0, 1]`.
    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = confidence.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped() {
        let r = ClassificationResult::new(InputKind::Prompt, 1.7, ClassificationMethod::Rule);
        assert_eq!(r.confidence, 1.0);
        let r = ClassificationResult::new(InputKind::Prompt, -0.2, ClassificationMethod::Rule);
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&InputKind::Workflow).unwrap(),
            "\"workflow\""
        );
        assert_eq!(
            serde_json::to_string(&ClassificationMethod::Ensemble).unwrap(),
            "\"ensemble\""
        );
    }
}
