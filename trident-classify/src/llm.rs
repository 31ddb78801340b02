//! LLM-backed classification: one structured model call, one retry on
//! an unparseable reply.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use keel::{
    AgentError, ClassificationMethod, ClassificationResult, InputKind, MetadataMap,
    ModelConfiguration, ModelMessage, ModelRequest,
};
use trident_provider::ModelHub;

use crate::method::ClassifyMethod;

const CLASSIFY_SYSTEM_PROMPT: &str = "\
You are an intent classifier for a coding assistant. Classify the user \
input into exactly one of: \"command\" (a slash command), \"prompt\" (a \
conversational question or statement answered directly), or \"workflow\" \
(a multi-step task that needs tools such as editing files or running \
commands). Reply with only a JSON object: \
{\"kind\": \"command|prompt|workflow\", \"confidence\": 0.0-1.0, \
\"reasoning\": \"one sentence\"}";

#[derive(Debug, Deserialize)]
struct LlmReply {
    kind: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Configuration for [`LlmMethod`].
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct LlmMethodConfig {
    /// Backend and model used for classification calls.
    pub model: ModelConfiguration,
}

impl LlmMethodConfig {
    /// Classification against the given provider/model at a low
    /// temperature.
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            model: ModelConfiguration::new(provider_id, model_id).with_temperature(0.1),
        }
    }
}

/// Classifies with a structured model call.
pub struct LlmMethod {
    hub: Arc<ModelHub>,
    config: LlmMethodConfig,
}

impl LlmMethod {
    /// An LLM method over the given hub.
    pub fn new(hub: Arc<ModelHub>, config: LlmMethodConfig) -> Self {
        Self { hub, config }
    }

    /// The sampling temperature this variant uses.
    pub fn temperature(&self) -> Option<f64> {
        self.config.model.temperature
    }

    fn build_request(&self, text: &str) -> ModelRequest {
        ModelRequest {
            messages: vec![
                ModelMessage::system(CLASSIFY_SYSTEM_PROMPT),
                ModelMessage::user(text),
            ],
            config: self.config.model.clone(),
            context: MetadataMap::new(),
        }
    }

    fn parse_reply(content: &str) -> Option<ClassificationResult> {
        // The model may wrap the object in prose; take the outermost
        // braces.
        let raw = match serde_json::from_str::<LlmReply>(content) {
            Ok(reply) => reply,
            Err(_) => {
                let start = content.find('{')?;
                let end = content.rfind('}')?;
                serde_json::from_str::<LlmReply>(&content[start..=end]).ok()?
            }
        };
        let kind = match raw.kind.as_str() {
            "command" => InputKind::Command,
            "prompt" => InputKind::Prompt,
            "workflow" => InputKind::Workflow,
            _ => return None,
        };
        let mut result = ClassificationResult::new(
            kind,
            raw.confidence.unwrap_or(0.5),
            ClassificationMethod::Llm,
        );
        if let Some(reasoning) = raw.reasoning {
            result = result.with_reasoning(reasoning);
        }
        Some(result)
    }
}

#[async_trait]
impl ClassifyMethod for LlmMethod {
    fn name(&self) -> ClassificationMethod {
        ClassificationMethod::Llm
    }

    fn expected_accuracy(&self) -> f64 {
        0.9
    }

    fn average_latency_ms(&self) -> u64 {
        800
    }

    async fn classify(
        &self,
        text: &str,
        _context: Option<&MetadataMap>,
    ) -> Result<ClassificationResult, AgentError> {
        let mut last_content = String::new();
        // One retry on parse failure.
        for attempt in 0..2 {
            let response = self.hub.invoke(self.build_request(text)).await?;
            last_content = response.content;
            if let Some(result) = Self::parse_reply(&last_content) {
                return Ok(result);
            }
            debug!(attempt, "classification reply did not parse");
        }
        Err(AgentError::system(
            "CLASSIFY_PARSE",
            format!("unparseable classification reply: {last_content}"),
        ))
    }
}
