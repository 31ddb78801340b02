//! The input classifier: method selection, fallback, escalation.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use keel::{
    AgentError, ClassificationMethod, ClassificationResult, InputKind, MetadataMap,
};

use crate::method::ClassifyMethod;

/// Configuration for [`InputClassifier`].
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Method used when the request does not pick one.
    pub default_method: ClassificationMethod,
    /// Method tried when the chosen method fails.
    pub fallback_method: ClassificationMethod,
    /// Below this confidence the ensemble escalation kicks in.
    pub confidence_threshold: f64,
    /// Whether sub-threshold results escalate to the ensemble.
    pub ensemble_for_uncertain: bool,
    /// Command prefix used by the safe-default path.
    pub command_prefix: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            default_method: ClassificationMethod::Hybrid,
            fallback_method: ClassificationMethod::Rule,
            confidence_threshold: 0.8,
            ensemble_for_uncertain: false,
            command_prefix: "/".to_string(),
        }
    }
}

/// Routes classification requests to a method table, falls back on
/// failure, and escalates uncertain results to the ensemble.
pub struct InputClassifier {
    methods: HashMap<ClassificationMethod, Arc<dyn ClassifyMethod>>,
    config: ClassifierConfig,
}

impl InputClassifier {
    /// A classifier over the given method table.
    pub fn new(
        methods: HashMap<ClassificationMethod, Arc<dyn ClassifyMethod>>,
        config: ClassifierConfig,
    ) -> Self {
        Self { methods, config }
    }

    fn method(&self, name: ClassificationMethod) -> Result<&Arc<dyn ClassifyMethod>, AgentError> {
        self.methods.get(&name).ok_or_else(|| {
            AgentError::configuration(
                "METHOD_NOT_CONFIGURED",
                format!("classification method not configured: {name}"),
            )
        })
    }

    /// When every method fails: command iff the prefix matches, else
    /// prompt, at rock-bottom confidence.
    fn safe_default(&self, text: &str) -> ClassificationResult {
        let kind = if text.trim().starts_with(&self.config.command_prefix) {
            InputKind::Command
        } else {
            InputKind::Prompt
        };
        let mut result =
            ClassificationResult::new(kind, 0.1, self.config.fallback_method)
                .with_reasoning("all classification methods failed; safe default");
        result.metadata.insert("safe_default".into(), true.into());
        result
    }

    /// Classify `text` with `requested` (or the configured default),
    /// falling back and escalating per configuration.
    pub async fn classify(
        &self,
        text: &str,
        requested: Option<ClassificationMethod>,
        context: Option<&MetadataMap>,
    ) -> Result<ClassificationResult, AgentError> {
        let chosen = requested.unwrap_or(self.config.default_method);
        let mut result = match self.method(chosen)?.classify(text, context).await {
            Ok(result) => result,
            Err(primary_error) => {
                warn!(method = %chosen, error = %primary_error, "classification method failed");
                match self.method(self.config.fallback_method) {
                    Ok(fallback) => match fallback.classify(text, context).await {
                        Ok(mut fallback_result) => {
                            fallback_result
                                .set_confidence((fallback_result.confidence - 0.2).max(0.1));
                            let note = format!(
                                "primary method {chosen} failed: {}",
                                primary_error.message
                            );
                            fallback_result.reasoning = Some(match fallback_result.reasoning {
                                Some(reasoning) => format!("{reasoning} ({note})"),
                                None => note,
                            });
                            fallback_result
                                .metadata
                                .insert("fallback_from".into(), chosen.to_string().into());
                            fallback_result
                        }
                        Err(_) => self.safe_default(text),
                    },
                    Err(_) => self.safe_default(text),
                }
            }
        };

        if self.config.ensemble_for_uncertain
            && result.method != ClassificationMethod::Ensemble
            && result.confidence < self.config.confidence_threshold
        {
            if let Ok(ensemble) = self.method(ClassificationMethod::Ensemble) {
                debug!(
                    confidence = result.confidence,
                    "escalating uncertain classification to ensemble"
                );
                match ensemble.classify(text, context).await {
                    Ok(mut escalated) => {
                        escalated
                            .metadata
                            .insert("escalated_from".into(), result.method.to_string().into());
                        escalated.metadata.insert(
                            "original_confidence".into(),
                            serde_json::json!(result.confidence),
                        );
                        return Ok(escalated);
                    }
                    Err(e) => {
                        debug!(error = %e, "ensemble escalation failed; keeping original");
                        result
                            .metadata
                            .insert("escalation_failed".into(), true.into());
                    }
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedMethod {
        name: ClassificationMethod,
        result: Result<(InputKind, f64), String>,
    }

    #[async_trait]
    impl ClassifyMethod for FixedMethod {
        fn name(&self) -> ClassificationMethod {
            self.name
        }
        fn expected_accuracy(&self) -> f64 {
            0.5
        }
        fn average_latency_ms(&self) -> u64 {
            0
        }
        async fn classify(
            &self,
            _text: &str,
            _context: Option<&MetadataMap>,
        ) -> Result<ClassificationResult, AgentError> {
            match &self.result {
                Ok((kind, confidence)) => {
                    Ok(ClassificationResult::new(*kind, *confidence, self.name))
                }
                Err(message) => Err(AgentError::system("METHOD_FAILED", message.clone())),
            }
        }
    }

    fn classifier(
        methods: Vec<FixedMethod>,
        config: ClassifierConfig,
    ) -> InputClassifier {
        let table: HashMap<ClassificationMethod, Arc<dyn ClassifyMethod>> = methods
            .into_iter()
            .map(|m| (m.name, Arc::new(m) as Arc<dyn ClassifyMethod>))
            .collect();
        InputClassifier::new(table, config)
    }

    #[tokio::test]
    async fn default_method_is_used_when_none_requested() {
        let c = classifier(
            vec![FixedMethod {
                name: ClassificationMethod::Hybrid,
                result: Ok((InputKind::Prompt, 0.9)),
            }],
            ClassifierConfig::default(),
        );
        let result = c.classify("hello", None, None).await.unwrap();
        assert_eq!(result.method, ClassificationMethod::Hybrid);
        assert_eq!(result.kind, InputKind::Prompt);
    }

    #[tokio::test]
    async fn failure_falls_back_with_reduced_confidence() {
        let c = classifier(
            vec![
                FixedMethod {
                    name: ClassificationMethod::Hybrid,
                    result: Err("model unreachable".into()),
                },
                FixedMethod {
                    name: ClassificationMethod::Rule,
                    result: Ok((InputKind::Workflow, 0.7)),
                },
            ],
            ClassifierConfig::default(),
        );
        let result = c.classify("fix things", None, None).await.unwrap();
        assert_eq!(result.kind, InputKind::Workflow);
        assert!((result.confidence - 0.5).abs() < 1e-9);
        assert_eq!(result.metadata["fallback_from"], "hybrid");
        assert!(result.reasoning.unwrap().contains("model unreachable"));
    }

    #[tokio::test]
    async fn fallback_confidence_floors_at_point_one() {
        let c = classifier(
            vec![
                FixedMethod {
                    name: ClassificationMethod::Hybrid,
                    result: Err("down".into()),
                },
                FixedMethod {
                    name: ClassificationMethod::Rule,
                    result: Ok((InputKind::Prompt, 0.15)),
                },
            ],
            ClassifierConfig::default(),
        );
        let result = c.classify("x", None, None).await.unwrap();
        assert!((result.confidence - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn both_failing_yields_safe_default() {
        let c = classifier(
            vec![
                FixedMethod {
                    name: ClassificationMethod::Hybrid,
                    result: Err("down".into()),
                },
                FixedMethod {
                    name: ClassificationMethod::Rule,
                    result: Err("also down".into()),
                },
            ],
            ClassifierConfig::default(),
        );
        let result = c.classify("/status", None, None).await.unwrap();
        assert_eq!(result.kind, InputKind::Command);
        assert_eq!(result.confidence, 0.1);
        assert_eq!(result.metadata["safe_default"], true);

        let result = c.classify("hello there", None, None).await.unwrap();
        assert_eq!(result.kind, InputKind::Prompt);
    }

    #[tokio::test]
    async fn uncertain_result_escalates_to_ensemble() {
        let mut config = ClassifierConfig::default();
        config.ensemble_for_uncertain = true;
        let c = classifier(
            vec![
                FixedMethod {
                    name: ClassificationMethod::Hybrid,
                    result: Ok((InputKind::Prompt, 0.4)),
                },
                FixedMethod {
                    name: ClassificationMethod::Ensemble,
                    result: Ok((InputKind::Workflow, 0.85)),
                },
            ],
            config,
        );
        let result = c.classify("do things", None, None).await.unwrap();
        assert_eq!(result.kind, InputKind::Workflow);
        assert_eq!(result.method, ClassificationMethod::Ensemble);
        assert_eq!(result.metadata["escalated_from"], "hybrid");
        assert_eq!(result.metadata["original_confidence"], 0.4);
    }

    #[tokio::test]
    async fn confident_result_does_not_escalate() {
        let mut config = ClassifierConfig::default();
        config.ensemble_for_uncertain = true;
        let c = classifier(
            vec![
                FixedMethod {
                    name: ClassificationMethod::Hybrid,
                    result: Ok((InputKind::Prompt, 0.95)),
                },
                FixedMethod {
                    name: ClassificationMethod::Ensemble,
                    result: Ok((InputKind::Workflow, 0.85)),
                },
            ],
            config,
        );
        let result = c.classify("hello", None, None).await.unwrap();
        assert_eq!(result.method, ClassificationMethod::Hybrid);
        assert!(!result.metadata.contains_key("escalated_from"));
    }

    #[tokio::test]
    async fn requested_method_overrides_default() {
        let c = classifier(
            vec![
                FixedMethod {
                    name: ClassificationMethod::Hybrid,
                    result: Ok((InputKind::Prompt, 0.9)),
                },
                FixedMethod {
                    name: ClassificationMethod::Llm,
                    result: Ok((InputKind::Workflow, 0.9)),
                },
            ],
            ClassifierConfig::default(),
        );
        let result = c
            .classify("x", Some(ClassificationMethod::Llm), None)
            .await
            .unwrap();
        assert_eq!(result.method, ClassificationMethod::Llm);
    }
}
