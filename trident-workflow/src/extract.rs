//! Workflow extraction: free text → [`WorkflowSpec`].

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use keel::{
    MetadataMap, ModelConfiguration, ModelMessage, ModelRequest, Pattern, WorkflowId, WorkflowSpec,
};
use trident_provider::ModelHub;

use crate::compile::build_pattern_spec;

/// How a spec was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    /// Keyword scoring against the mode table.
    Template,
    /// Structured model call.
    Llm,
    /// Template first, model refinement on low score.
    Hybrid,
}

/// One user-facing workflow mode mapped to a pattern.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ModeSpec {
    /// Mode name ("editing", "debugging", ...).
    pub name: String,
    /// The pattern this mode compiles to.
    pub pattern: Pattern,
    /// Keywords that vote for this mode.
    pub keywords: Vec<String>,
    /// Tools a workflow in this mode uses.
    pub tools: Vec<String>,
}

/// Extractor configuration.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// The mode table.
    pub modes: Vec<ModeSpec>,
    /// Which extraction method to run.
    pub method: ExtractionMethod,
    /// Template score below which hybrid refines with the model.
    pub template_threshold: f64,
    /// Model used for LLM extraction.
    pub model: ModelConfiguration,
}

impl ExtractorConfig {
    /// The standard mode table over the given provider/model.
    pub fn standard(provider_id: &str, model_id: &str) -> Self {
        let mode = |name: &str, pattern, keywords: &[&str]| ModeSpec {
            name: name.to_string(),
            pattern,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            tools: vec![],
        };
        Self {
            modes: vec![
                mode(
                    "editing",
                    Pattern::React,
                    &["fix", "edit", "change", "update", "refactor", "rename", "patch"],
                ),
                mode(
                    "debugging",
                    Pattern::ProblemSolving,
                    &["debug", "error", "crash", "failing", "broken", "diagnose"],
                ),
                mode(
                    "planning",
                    Pattern::Analytical,
                    &["plan", "design", "architect", "analyze", "evaluate", "compare"],
                ),
                mode(
                    "creation",
                    Pattern::Creative,
                    &["create", "write", "implement", "add", "build", "generate", "new"],
                ),
                mode(
                    "research",
                    Pattern::Informational,
                    &["find", "search", "look up", "what is", "research", "locate"],
                ),
            ],
            method: ExtractionMethod::Hybrid,
            template_threshold: 0.5,
            model: ModelConfiguration::new(provider_id, model_id),
        }
    }
}

/// Extraction outcome. `success = false` still carries
/// `fallback_pattern` (always conversational) so the dispatcher can
/// downgrade to a prompt.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    /// Whether a valid spec was produced.
    pub success: bool,
    /// The spec, when extraction succeeded.
    pub spec: Option<WorkflowSpec>,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f64,
    /// The method that ran.
    pub method: ExtractionMethod,
    /// Mode name that matched, when the template contributed.
    pub mode: Option<String>,
    /// Human-readable error on failure.
    pub error: Option<String>,
    /// Downgrade target on failure.
    pub fallback_pattern: Pattern,
}

impl ExtractionResult {
    fn failure(method: ExtractionMethod, error: impl Into<String>) -> Self {
        Self {
            success: false,
            spec: None,
            confidence: 0.0,
            method,
            mode: None,
            error: Some(error.into()),
            fallback_pattern: Pattern::Conversational,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LlmSpecReply {
    pattern: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    required_tools: Vec<String>,
    #[serde(default)]
    params: MetadataMap,
}

const EXTRACT_SYSTEM_PROMPT: &str = "\
You design workflows for a coding assistant. Given a task, reply with \
only a JSON object selecting the execution pattern and the tools it \
needs: {\"pattern\": \"analytical|creative|problem-solving|informational|\
react|rewoo|adapt\", \"confidence\": 0.0-1.0, \"required_tools\": \
[\"tool-name\"], \"params\": {}}";

/// Turns input text into an executable workflow spec.
pub struct WorkflowExtractor {
    hub: Arc<ModelHub>,
    config: ExtractorConfig,
}

impl WorkflowExtractor {
    /// An extractor over the given hub.
    pub fn new(hub: Arc<ModelHub>, config: ExtractorConfig) -> Self {
        Self { hub, config }
    }

    /// Extract a workflow spec from input text.
    pub async fn extract(&self, text: &str, _context: Option<&MetadataMap>) -> ExtractionResult {
        match self.config.method {
            ExtractionMethod::Template => self.extract_template(text),
            ExtractionMethod::Llm => self.extract_llm(text).await,
            ExtractionMethod::Hybrid => {
                let template = self.extract_template(text);
                if template.success && template.confidence >= self.config.template_threshold {
                    return template;
                }
                debug!(
                    template_confidence = template.confidence,
                    "template extraction weak; refining with model"
                );
                let llm = self.extract_llm(text).await;
                let mut best = match (template.success, llm.success) {
                    (_, true) if llm.confidence >= template.confidence => llm,
                    (true, _) => template,
                    (false, true) => llm,
                    (false, false) => return llm,
                };
                best.method = ExtractionMethod::Hybrid;
                best
            }
        }
    }

    fn extract_template(&self, text: &str) -> ExtractionResult {
        let lowered = text.to_lowercase();
        let scored = self
            .config
            .modes
            .iter()
            .map(|mode| {
                let matches = mode
                    .keywords
                    .iter()
                    .filter(|k| lowered.contains(k.as_str()))
                    .count();
                (mode, matches)
            })
            .max_by_key(|(_, matches)| *matches);

        match scored {
            Some((mode, matches)) if matches > 0 => {
                let confidence = (0.4 + 0.2 * matches as f64).min(0.95);
                let mut spec = build_pattern_spec(mode.pattern, WorkflowId::generate());
                spec.required_tools = mode.tools.clone();
                spec.params
                    .insert("mode".to_string(), mode.name.clone().into());
                ExtractionResult {
                    success: true,
                    spec: Some(spec),
                    confidence,
                    method: ExtractionMethod::Template,
                    mode: Some(mode.name.clone()),
                    error: None,
                    fallback_pattern: Pattern::Conversational,
                }
            }
            _ => ExtractionResult::failure(
                ExtractionMethod::Template,
                "no workflow mode matched the input",
            ),
        }
    }

    async fn extract_llm(&self, text: &str) -> ExtractionResult {
        let request = ModelRequest {
            messages: vec![
                ModelMessage::system(EXTRACT_SYSTEM_PROMPT),
                ModelMessage::user(text),
            ],
            config: self.config.model.clone(),
            context: MetadataMap::new(),
        };
        let response = match self.hub.invoke(request).await {
            Ok(response) => response,
            Err(e) => {
                return ExtractionResult::failure(
                    ExtractionMethod::Llm,
                    format!("extraction model call failed: {}", e.message),
                );
            }
        };
        let Some(reply) = parse_reply(&response.content) else {
            return ExtractionResult::failure(
                ExtractionMethod::Llm,
                "extraction reply was not a valid workflow spec",
            );
        };
        let Some(pattern) = Pattern::parse(&reply.pattern) else {
            return ExtractionResult::failure(
                ExtractionMethod::Llm,
                format!("extraction proposed unknown pattern: {}", reply.pattern),
            );
        };
        let mut spec = build_pattern_spec(pattern, WorkflowId::generate());
        spec.required_tools = reply.required_tools;
        spec.params.extend(reply.params);
        if let Err(e) = spec.validate() {
            return ExtractionResult::failure(
                ExtractionMethod::Llm,
                format!("extracted spec failed validation: {}", e.message),
            );
        }
        ExtractionResult {
            success: true,
            spec: Some(spec),
            confidence: reply.confidence.unwrap_or(0.7).clamp(0.0, 1.0),
            method: ExtractionMethod::Llm,
            mode: None,
            error: None,
            fallback_pattern: Pattern::Conversational,
        }
    }
}

fn parse_reply(content: &str) -> Option<LlmSpecReply> {
    match serde_json::from_str(content) {
        Ok(reply) => Some(reply),
        Err(_) => {
            let start = content.find('{')?;
            let end = content.rfind('}')?;
            serde_json::from_str(&content[start..=end]).ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trident_provider::ScriptedModel;

    fn extractor(method: ExtractionMethod, response: &str) -> WorkflowExtractor {
        let hub = Arc::new(ModelHub::new());
        hub.register("scripted", Arc::new(ScriptedModel::always(response)));
        let mut config = ExtractorConfig::standard("scripted", "s-1");
        config.method = method;
        WorkflowExtractor::new(hub, config)
    }

    #[tokio::test]
    async fn template_matches_editing_mode() {
        let e = extractor(ExtractionMethod::Template, "unused");
        let result = e
            .extract("fix the null check in auth.ts and update the tests", None)
            .await;
        assert!(result.success);
        assert_eq!(result.mode.as_deref(), Some("editing"));
        let spec = result.spec.unwrap();
        assert_eq!(spec.pattern, Pattern::React);
        assert_eq!(spec.params["mode"], "editing");
    }

    #[tokio::test]
    async fn template_fails_on_unmatched_text() {
        let e = extractor(ExtractionMethod::Template, "unused");
        let result = e.extract("mmm hmm", None).await;
        assert!(!result.success);
        assert_eq!(result.fallback_pattern, Pattern::Conversational);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn llm_extraction_builds_validated_spec() {
        let e = extractor(
            ExtractionMethod::Llm,
            r#"{"pattern": "rewoo", "confidence": 0.8, "required_tools": ["grep", "read_file"]}"#,
        );
        let result = e.extract("complicated multi step thing", None).await;
        assert!(result.success);
        let spec = result.spec.unwrap();
        assert_eq!(spec.pattern, Pattern::Rewoo);
        assert_eq!(spec.required_tools, ["grep", "read_file"]);
    }

    #[tokio::test]
    async fn llm_unknown_pattern_fails() {
        let e = extractor(ExtractionMethod::Llm, r#"{"pattern": "spiral"}"#);
        let result = e.extract("anything", None).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unknown pattern"));
    }

    #[tokio::test]
    async fn hybrid_keeps_strong_template_without_model_call() {
        let e = extractor(ExtractionMethod::Hybrid, r#"{"pattern": "adapt"}"#);
        let result = e.extract("fix and refactor and rename things", None).await;
        assert!(result.success);
        // Three keyword hits give the template a confident score; the
        // model's adapt proposal is never consulted.
        assert_eq!(result.method, ExtractionMethod::Template);
        assert_eq!(result.spec.unwrap().pattern, Pattern::React);
    }

    #[tokio::test]
    async fn hybrid_refines_weak_template_with_model() {
        let e = extractor(
            ExtractionMethod::Hybrid,
            r#"{"pattern": "rewoo", "confidence": 0.9}"#,
        );
        // No keyword hits: the template fails and hybrid falls through
        // to the model.
        let result = e.extract("zzz qqq please", None).await;
        assert!(result.success);
        assert_eq!(result.method, ExtractionMethod::Hybrid);
        assert_eq!(result.spec.unwrap().pattern, Pattern::Rewoo);
    }
}
