#![deny(missing_docs)]
//! Input classification for trident.
//!
//! Four methods behind one trait (deterministic rules, a structured
//! LLM call, a rule-then-LLM hybrid, and a three-variant voting
//! ensemble) plus [`InputClassifier`], which selects a method per
//! request, falls back on failure, and escalates uncertain results.

mod classifier;
mod ensemble;
mod hybrid;
mod llm;
mod method;
mod rule;

pub use classifier::{ClassifierConfig, InputClassifier};
pub use ensemble::{EnsembleConfig, EnsembleMethod};
pub use hybrid::HybridMethod;
pub use llm::{LlmMethod, LlmMethodConfig};
pub use method::ClassifyMethod;
pub use rule::{RuleConfig, RuleMethod, RuleThresholds};

use keel::ClassificationMethod;
use std::collections::HashMap;
use std::sync::Arc;
use trident_provider::ModelHub;

/// Build the standard method table: rule, llm, hybrid, and ensemble
/// over one provider/model, all with default tuning.
pub fn standard_methods(
    hub: Arc<ModelHub>,
    provider_id: &str,
    model_id: &str,
) -> HashMap<ClassificationMethod, Arc<dyn ClassifyMethod>> {
    let rule = Arc::new(RuleMethod::with_defaults());
    let llm = Arc::new(LlmMethod::new(
        Arc::clone(&hub),
        LlmMethodConfig::new(provider_id, model_id),
    ));
    let hybrid = Arc::new(HybridMethod::new(
        RuleMethod::with_defaults(),
        LlmMethod::new(Arc::clone(&hub), LlmMethodConfig::new(provider_id, model_id)),
        0.8,
    ));
    let ensemble = Arc::new(EnsembleMethod::new(
        hub,
        provider_id,
        model_id,
        EnsembleConfig::default(),
    ));

    let mut methods: HashMap<ClassificationMethod, Arc<dyn ClassifyMethod>> = HashMap::new();
    methods.insert(ClassificationMethod::Rule, rule);
    methods.insert(ClassificationMethod::Llm, llm);
    methods.insert(ClassificationMethod::Hybrid, hybrid);
    methods.insert(ClassificationMethod::Ensemble, ensemble);
    methods
}
