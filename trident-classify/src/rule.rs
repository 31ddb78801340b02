//! Deterministic rule-based classification. No model call.

use async_trait::async_trait;

use keel::{
    AgentError, ClassificationMethod, ClassificationResult, InputKind, MetadataMap,
};

use crate::method::ClassifyMethod;

/// Per-kind confidence ceilings for indicator matches.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct RuleThresholds {
    /// Confidence for a prefix-matched command.
    pub command: f64,
    /// Ceiling for prompt indicator matches.
    pub prompt: f64,
    /// Ceiling for workflow indicator matches.
    pub workflow: f64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            command: 1.0,
            prompt: 0.8,
            workflow: 0.7,
        }
    }
}

/// Configuration for [`RuleMethod`].
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct RuleConfig {
    /// Commands start with this prefix (trimmed input).
    pub command_prefix: String,
    /// Inputs equal to one of these are conversational with full
    /// confidence.
    pub greetings: Vec<String>,
    /// Keywords suggesting a conversational prompt.
    pub prompt_indicators: Vec<String>,
    /// Keywords suggesting a multi-step workflow.
    pub workflow_indicators: Vec<String>,
    /// Per-kind confidence ceilings.
    pub thresholds: RuleThresholds,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            command_prefix: "/".to_string(),
            greetings: ["hello", "hi", "hey", "thanks", "thank you", "good morning"]
                .map(str::to_string)
                .to_vec(),
            prompt_indicators: [
                "what", "why", "how", "when", "explain", "tell me", "describe", "compare",
                "summarize", "?",
            ]
            .map(str::to_string)
            .to_vec(),
            workflow_indicators: [
                "fix", "refactor", "implement", "debug", "create", "add ", "update", "rename",
                "migrate", "write a", "build", "run tests", "install", "deploy", "and then",
            ]
            .map(str::to_string)
            .to_vec(),
            thresholds: RuleThresholds::default(),
        }
    }
}

/// Deterministic classifier: command prefix first, then keyword
/// indicator scoring with per-kind ceilings. Ties break toward the
/// kind with the higher ceiling.
pub struct RuleMethod {
    config: RuleConfig,
}

impl RuleMethod {
    /// A rule method with the given configuration.
    pub fn new(config: RuleConfig) -> Self {
        Self { config }
    }

    /// A rule method with the default indicator sets.
    pub fn with_defaults() -> Self {
        Self::new(RuleConfig::default())
    }

    /// The configured command prefix.
    pub fn command_prefix(&self) -> &str {
        &self.config.command_prefix
    }

    fn count_matches(text: &str, indicators: &[String]) -> (usize, Vec<String>) {
        let mut matched = vec![];
        for indicator in indicators {
            if text.contains(indicator.as_str()) {
                matched.push(indicator.clone());
            }
        }
        (matched.len(), matched)
    }

    /// Confidence grows with match count up to the per-kind ceiling.
    fn indicator_confidence(matches: usize, ceiling: f64) -> f64 {
        (0.5 + 0.15 * matches as f64).min(ceiling)
    }
}

#[async_trait]
impl ClassifyMethod for RuleMethod {
    fn name(&self) -> ClassificationMethod {
        ClassificationMethod::Rule
    }

    fn expected_accuracy(&self) -> f64 {
        0.75
    }

    fn average_latency_ms(&self) -> u64 {
        0
    }

    async fn classify(
        &self,
        text: &str,
        _context: Option<&MetadataMap>,
    ) -> Result<ClassificationResult, AgentError> {
        let trimmed = text.trim();
        let lowered = trimmed.to_lowercase();

        if let Some(rest) = trimmed.strip_prefix(&self.config.command_prefix) {
            let mut tokens = rest.split_whitespace();
            let name = tokens.next().unwrap_or_default().to_string();
            let args: Vec<serde_json::Value> =
                tokens.map(|t| serde_json::Value::from(t.to_string())).collect();
            return Ok(ClassificationResult::new(
                InputKind::Command,
                self.config.thresholds.command,
                ClassificationMethod::Rule,
            )
            .with_reasoning("input starts with the command prefix")
            .with_extracted("name", name.into())
            .with_extracted("args", serde_json::Value::Array(args)));
        }

        if self.config.greetings.iter().any(|g| lowered == *g) {
            return Ok(ClassificationResult::new(
                InputKind::Prompt,
                1.0,
                ClassificationMethod::Rule,
            )
            .with_reasoning("conversational greeting"));
        }

        let (prompt_matches, prompt_hits) =
            Self::count_matches(&lowered, &self.config.prompt_indicators);
        let (workflow_matches, workflow_hits) =
            Self::count_matches(&lowered, &self.config.workflow_indicators);

        // Ties break by the higher per-kind ceiling (prompt over
        // workflow under the defaults).
        let pick_workflow = workflow_matches > prompt_matches
            || (workflow_matches == prompt_matches
                && workflow_matches > 0
                && self.config.thresholds.workflow > self.config.thresholds.prompt);

        let result = if workflow_matches == 0 && prompt_matches == 0 {
            ClassificationResult::new(InputKind::Prompt, 0.5, ClassificationMethod::Rule)
                .with_reasoning("no indicators matched; defaulting to prompt")
        } else if pick_workflow {
            ClassificationResult::new(
                InputKind::Workflow,
                Self::indicator_confidence(workflow_matches, self.config.thresholds.workflow),
                ClassificationMethod::Rule,
            )
            .with_reasoning(format!("workflow indicators: {}", workflow_hits.join(", ")))
            .with_extracted("indicators", serde_json::to_value(workflow_hits).unwrap_or_default())
        } else {
            ClassificationResult::new(
                InputKind::Prompt,
                Self::indicator_confidence(prompt_matches, self.config.thresholds.prompt),
                ClassificationMethod::Rule,
            )
            .with_reasoning(format!("prompt indicators: {}", prompt_hits.join(", ")))
            .with_extracted("indicators", serde_json::to_value(prompt_hits).unwrap_or_default())
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method() -> RuleMethod {
        RuleMethod::with_defaults()
    }

    #[tokio::test]
    async fn command_prefix_wins_with_full_confidence() {
        let result = method().classify("/status --verbose", None).await.unwrap();
        assert_eq!(result.kind, InputKind::Command);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.extracted["name"], "status");
        assert_eq!(result.extracted["args"], serde_json::json!(["--verbose"]));
    }

    #[tokio::test]
    async fn greeting_is_a_confident_prompt() {
        let result = method().classify("hello", None).await.unwrap();
        assert_eq!(result.kind, InputKind::Prompt);
        assert_eq!(result.confidence, 1.0);
    }

    #[tokio::test]
    async fn task_language_is_a_workflow() {
        let result = method()
            .classify("fix the null check in auth.ts and run tests", None)
            .await
            .unwrap();
        assert_eq!(result.kind, InputKind::Workflow);
        assert!(result.confidence >= 0.7, "got {}", result.confidence);
    }

    #[tokio::test]
    async fn question_is_a_prompt() {
        let result = method()
            .classify("why does the borrow checker reject this?", None)
            .await
            .unwrap();
        assert_eq!(result.kind, InputKind::Prompt);
        assert!(result.confidence > 0.5);
    }

    #[tokio::test]
    async fn unmatched_text_defaults_to_prompt() {
        let result = method().classify("zzz qqq", None).await.unwrap();
        assert_eq!(result.kind, InputKind::Prompt);
        assert_eq!(result.confidence, 0.5);
    }
}
