//! Ensemble classification: three model variants voting.

use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use keel::{AgentError, ClassificationMethod, ClassificationResult, InputKind, MetadataMap};
use trident_provider::ModelHub;

use crate::llm::{LlmMethod, LlmMethodConfig};
use crate::method::ClassifyMethod;

/// Temperatures for the three standard variants.
const VARIANT_TEMPERATURES: [f64; 3] = [0.1, 0.3, 0.5];

/// Configuration for [`EnsembleMethod`].
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    /// Per-variant vote weights, matching the variant order.
    pub weights: [f64; 3],
    /// Agreement ratio at which the +0.1 confidence bonus applies.
    pub minimum_agreement: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            weights: [1.0, 1.0, 1.0],
            minimum_agreement: 0.6,
        }
    }
}

/// Runs three LLM variants concurrently at different temperatures and
/// combines their votes.
///
/// Winner: the kind maximising `votes × mean(confidence)`. Final
/// confidence: `min(0.99, mean_conf × agreement + 0.1·[agreement ≥
/// minimum_agreement])`.
pub struct EnsembleMethod {
    variants: Vec<LlmMethod>,
    config: EnsembleConfig,
}

impl EnsembleMethod {
    /// An ensemble over the given hub, provider, and model.
    pub fn new(
        hub: Arc<ModelHub>,
        provider_id: &str,
        model_id: &str,
        config: EnsembleConfig,
    ) -> Self {
        let variants = VARIANT_TEMPERATURES
            .iter()
            .map(|&temperature| {
                let mut llm_config = LlmMethodConfig::new(provider_id, model_id);
                llm_config.model.temperature = Some(temperature);
                LlmMethod::new(Arc::clone(&hub), llm_config)
            })
            .collect();
        Self { variants, config }
    }

    fn combine(
        &self,
        votes: Vec<(f64, ClassificationResult)>,
    ) -> Result<ClassificationResult, AgentError> {
        if votes.is_empty() {
            return Err(AgentError::system(
                "ENSEMBLE_EMPTY",
                "no ensemble variant produced a result",
            ));
        }

        let mut per_kind: HashMap<InputKind, (f64, Vec<f64>)> = HashMap::new();
        let mut total_weight = 0.0;
        for (weight, result) in &votes {
            total_weight += weight;
            let entry = per_kind.entry(result.kind).or_insert((0.0, vec![]));
            entry.0 += weight;
            entry.1.push(result.confidence);
        }

        let (winner, (winner_votes, confidences)) = per_kind
            .into_iter()
            .max_by(|(_, (votes_a, confs_a)), (_, (votes_b, confs_b))| {
                let score_a = votes_a * mean(confs_a);
                let score_b = votes_b * mean(confs_b);
                score_a.partial_cmp(&score_b).unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("votes is non-empty");

        let mean_confidence = mean(&confidences);
        let agreement = winner_votes / total_weight;
        let bonus = if agreement >= self.config.minimum_agreement {
            0.1
        } else {
            0.0
        };
        let final_confidence = (mean_confidence * agreement + bonus).min(0.99);

        let mut result =
            ClassificationResult::new(winner, final_confidence, ClassificationMethod::Ensemble)
                .with_reasoning(format!(
                    "{:.0}% of weighted votes for {winner}",
                    agreement * 100.0
                ));
        result.metadata.insert(
            "agreement_score".into(),
            serde_json::json!((agreement * 1000.0).round() / 1000.0),
        );
        result
            .metadata
            .insert("mean_confidence".into(), serde_json::json!(mean_confidence));
        result
            .metadata
            .insert("variant_count".into(), serde_json::json!(votes.len()));
        Ok(result)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[async_trait]
impl ClassifyMethod for EnsembleMethod {
    fn name(&self) -> ClassificationMethod {
        ClassificationMethod::Ensemble
    }

    fn expected_accuracy(&self) -> f64 {
        0.93
    }

    fn average_latency_ms(&self) -> u64 {
        1200
    }

    async fn classify(
        &self,
        text: &str,
        context: Option<&MetadataMap>,
    ) -> Result<ClassificationResult, AgentError> {
        let calls = self
            .variants
            .iter()
            .map(|variant| variant.classify(text, context));
        let outcomes = join_all(calls).await;

        let mut votes = Vec::new();
        for (i, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(result) => votes.push((self.config.weights[i], result)),
                Err(e) => debug!(variant = i, error = %e, "ensemble variant failed"),
            }
        }
        self.combine(votes)
    }
}
