//! Hybrid classification: rules first, model on low confidence.

use async_trait::async_trait;

use keel::{AgentError, ClassificationMethod, ClassificationResult, MetadataMap};

use crate::llm::LlmMethod;
use crate::method::ClassifyMethod;
use crate::rule::RuleMethod;

/// Runs the rule method and returns its result when confident enough;
/// otherwise consults the LLM and blends confidences
/// (`max(rule, llm)`).
pub struct HybridMethod {
    rule: RuleMethod,
    llm: LlmMethod,
    confidence_threshold: f64,
}

impl HybridMethod {
    /// A hybrid over the given rule and LLM methods. `threshold` is the
    /// rule confidence at which the LLM call is skipped (default 0.8).
    pub fn new(rule: RuleMethod, llm: LlmMethod, confidence_threshold: f64) -> Self {
        Self {
            rule,
            llm,
            confidence_threshold,
        }
    }
}

#[async_trait]
impl ClassifyMethod for HybridMethod {
    fn name(&self) -> ClassificationMethod {
        ClassificationMethod::Hybrid
    }

    fn expected_accuracy(&self) -> f64 {
        0.88
    }

    fn average_latency_ms(&self) -> u64 {
        200
    }

    async fn classify(
        &self,
        text: &str,
        context: Option<&MetadataMap>,
    ) -> Result<ClassificationResult, AgentError> {
        let rule_result = self.rule.classify(text, context).await?;
        if rule_result.confidence >= self.confidence_threshold {
            return Ok(rule_result);
        }

        let mut llm_result = self.llm.classify(text, context).await?;
        let blended = rule_result.confidence.max(llm_result.confidence);
        llm_result.set_confidence(blended);
        llm_result.method = ClassificationMethod::Hybrid;
        llm_result.metadata.insert(
            "rule_confidence".into(),
            serde_json::json!(rule_result.confidence),
        );
        llm_result
            .metadata
            .insert("rule_kind".into(), rule_result.kind.to_string().into());
        Ok(llm_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmMethodConfig;
    use crate::rule::RuleConfig;
    use keel::InputKind;
    use std::sync::Arc;
    use trident_provider::{ModelHub, ScriptedModel};

    fn hybrid(response: &str) -> (HybridMethod, Arc<ScriptedModel>) {
        let script = Arc::new(ScriptedModel::always(response));
        let hub = Arc::new(ModelHub::new());
        hub.register("scripted", script.clone() as Arc<dyn keel::ModelBackend>);
        let llm = LlmMethod::new(hub, LlmMethodConfig::new("scripted", "s-1"));
        (
            HybridMethod::new(RuleMethod::new(RuleConfig::default()), llm, 0.8),
            script,
        )
    }

    #[tokio::test]
    async fn confident_rule_skips_the_model() {
        let (method, script) = hybrid(r#"{"kind": "workflow", "confidence": 0.9}"#);
        let result = method.classify("/status", None).await.unwrap();
        assert_eq!(result.kind, InputKind::Command);
        assert_eq!(result.method, ClassificationMethod::Rule);
        assert_eq!(script.invocation_count(), 0, "no model call was made");
    }

    #[tokio::test]
    async fn uncertain_rule_consults_the_model_and_blends() {
        let (method, script) = hybrid(r#"{"kind": "workflow", "confidence": 0.6}"#);
        // No strong indicators: the rule result sits at 0.5 and the LLM
        // runs. Blended confidence is max(0.5, 0.6).
        let result = method.classify("zzz qqq", None).await.unwrap();
        assert_eq!(result.kind, InputKind::Workflow);
        assert_eq!(result.method, ClassificationMethod::Hybrid);
        assert_eq!(result.confidence, 0.6);
        assert_eq!(result.metadata["rule_confidence"], 0.5);
        assert_eq!(script.invocation_count(), 1);
    }

    #[tokio::test]
    async fn blend_keeps_the_rule_confidence_when_higher() {
        let (method, _script) = hybrid(r#"{"kind": "prompt", "confidence": 0.3}"#);
        // One prompt indicator puts the rule at 0.65: uncertain enough
        // to consult the model, higher than the model's own number.
        let result = method.classify("tell me about lifetimes", None).await.unwrap();
        assert_eq!(result.method, ClassificationMethod::Hybrid);
        assert_eq!(result.confidence, 0.65);
    }
}
