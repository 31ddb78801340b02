//! The classification-method trait.

use async_trait::async_trait;

use keel::{AgentError, ClassificationMethod, ClassificationResult, MetadataMap};

/// One way of classifying input. Implementations: rule, llm, hybrid,
/// ensemble. The trait is object-safe so the input classifier can hold
/// a method table keyed by [`ClassificationMethod`].
#[async_trait]
pub trait ClassifyMethod: Send + Sync {
    /// Which method this is.
    fn name(&self) -> ClassificationMethod;

    /// Expected accuracy in `[0, 1]`, used by operators picking a
    /// default method.
    fn expected_accuracy(&self) -> f64;

    /// Typical latency for one classification.
    fn average_latency_ms(&self) -> u64;

    /// Classify the input text.
    async fn classify(
        &self,
        text: &str,
        context: Option<&MetadataMap>,
    ) -> Result<ClassificationResult, AgentError>;
}
