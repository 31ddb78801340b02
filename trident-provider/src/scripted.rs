//! ScriptedModel — deterministic canned responses.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use keel::{
    AgentError, FinishReason, ModelBackend, ModelCapabilities, ModelRequest, ModelResponse,
    ModelRole, TokenUsage,
};

/// One response rule: fires when the request text contains `pattern`.
#[derive(Debug, Clone)]
pub struct ScriptRule {
    /// Substring matched against the concatenated request messages.
    pub pattern: String,
    /// The canned response body.
    pub response: String,
}

/// A backend that replays scripted responses.
///
/// Rules are tried in order against the full request text (system +
/// conversation); the first match wins, otherwise `default_response` is
/// returned. Drives deterministic integration tests and the CLI demo
/// profile.
pub struct ScriptedModel {
    rules: Vec<ScriptRule>,
    default_response: String,
    invocations: AtomicUsize,
}

impl ScriptedModel {
    /// A scripted backend with the given rules and fallback response.
    pub fn new(rules: Vec<ScriptRule>, default_response: impl Into<String>) -> Self {
        Self {
            rules,
            default_response: default_response.into(),
            invocations: AtomicUsize::new(0),
        }
    }

    /// A backend that always answers with the same text.
    pub fn always(response: impl Into<String>) -> Self {
        Self::new(vec![], response)
    }

    /// How many times `invoke` has been called.
    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    fn pick_response(&self, request: &ModelRequest) -> String {
        let haystack: String = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.rules
            .iter()
            .find(|rule| haystack.contains(&rule.pattern))
            .map(|rule| rule.response.clone())
            .unwrap_or_else(|| self.default_response.clone())
    }
}

#[async_trait]
impl ModelBackend for ScriptedModel {
    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            supports_streaming: true,
            supports_tool_calling: true,
            supports_system_messages: true,
            max_context_length: 128_000,
            supported_message_types: vec!["text".to_string()],
        }
    }

    async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse, AgentError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let content = self.pick_response(&request);
        let prompt_chars: u64 = request
            .messages
            .iter()
            .filter(|m| m.role != ModelRole::Assistant)
            .map(|m| m.content.chars().count() as u64)
            .sum();
        Ok(ModelResponse {
            usage: TokenUsage::new(prompt_chars.div_ceil(4), (content.chars().count() as u64).div_ceil(4)),
            content,
            finish_reason: FinishReason::Completed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel::{ModelConfiguration, ModelMessage};

    fn request(text: &str) -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::user(text)],
            config: ModelConfiguration::new("scripted", "s-1"),
            context: Default::default(),
        }
    }

    #[tokio::test]
    async fn first_matching_rule_wins() {
        let model = ScriptedModel::new(
            vec![
                ScriptRule {
                    pattern: "classify".into(),
                    response: r#"{"kind":"prompt"}"#.into(),
                },
                ScriptRule {
                    pattern: "class".into(),
                    response: "never reached".into(),
                },
            ],
            "fallback",
        );
        let response = model.invoke(request("please classify this")).await.unwrap();
        assert_eq!(response.content, r#"{"kind":"prompt"}"#);
    }

    #[tokio::test]
    async fn falls_back_to_default() {
        let model = ScriptedModel::always("hi there");
        let response = model.invoke(request("anything")).await.unwrap();
        assert_eq!(response.content, "hi there");
        assert_eq!(model.invocation_count(), 1);
    }
}
