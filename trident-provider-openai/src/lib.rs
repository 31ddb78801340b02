#![deny(missing_docs)]
//! OpenAI-compatible backend for trident.
//!
//! Implements `keel::ModelBackend` against any chat-completions
//! endpoint speaking the OpenAI wire format. Endpoint and key come
//! from [`OpenAiConfig`], never from code. Streaming uses the uniform
//! invoke-backed adapter; chunked SSE is a backend concern this crate
//! does not take on.

mod types;

use async_trait::async_trait;

use keel::{
    AgentError, FinishReason, ModelBackend, ModelCapabilities, ModelRequest, ModelResponse,
    ModelRole, TokenUsage,
};
use types::*;

/// Connection configuration for an OpenAI-compatible endpoint.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full URL of the chat-completions endpoint.
    pub api_url: String,
    /// Bearer token.
    pub api_key: String,
    /// Optional `OpenAI-Organization` header value.
    pub organization: Option<String>,
}

impl OpenAiConfig {
    /// Configuration for the hosted OpenAI endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".into(),
            api_key: api_key.into(),
            organization: None,
        }
    }

    /// Point at a different endpoint (proxy, local server).
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

/// OpenAI-compatible chat-completions backend.
pub struct OpenAiBackend {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiBackend {
    /// A backend with the given configuration.
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn build_request(&self, request: &ModelRequest) -> ChatRequest {
        ChatRequest {
            model: request.config.model_id.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| ChatMessage {
                    role: match m.role {
                        ModelRole::System => "system",
                        ModelRole::User => "user",
                        ModelRole::Assistant => "assistant",
                    }
                    .to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: request.config.temperature,
            max_tokens: request.config.max_tokens,
            stop: request.config.stop_sequences.clone(),
        }
    }
}

fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("length") => FinishReason::Length,
        Some("stop") | None => FinishReason::Completed,
        Some("tool_calls") | Some("function_call") => FinishReason::ToolCall,
        Some(_) => FinishReason::Stop,
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            supports_streaming: true,
            supports_tool_calling: false,
            supports_system_messages: true,
            max_context_length: 128_000,
            supported_message_types: vec!["text".to_string()],
        }
    }

    async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse, AgentError> {
        let body = self.build_request(&request);
        let mut http = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&body);
        if let Some(org) = &self.config.organization {
            http = http.header("OpenAI-Organization", org);
        }

        let response = http.send().await.map_err(|e| {
            AgentError::network("UPSTREAM_UNREACHABLE", format!("model request failed: {e}"))
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            AgentError::network("UPSTREAM_UNREACHABLE", format!("reading response failed: {e}"))
        })?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| text.clone());
            return Err(AgentError::network(
                "MODEL_BACKEND",
                format!("backend returned {status}: {detail}"),
            ));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            AgentError::network("MODEL_BACKEND", format!("invalid backend response: {e}"))
        })?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            AgentError::network("MODEL_BACKEND", "backend returned no choices")
        })?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: if u.total_tokens > 0 {
                    u.total_tokens
                } else {
                    u.prompt_tokens + u.completion_tokens
                },
            })
            .unwrap_or_default();

        Ok(ModelResponse {
            content: choice.message.content,
            finish_reason: map_finish_reason(choice.finish_reason.as_deref()),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel::{ModelConfiguration, ModelMessage};

    #[test]
    fn request_maps_roles_and_parameters() {
        let backend = OpenAiBackend::new(OpenAiConfig::new("sk-test"));
        let request = ModelRequest {
            messages: vec![
                ModelMessage::system("be terse"),
                ModelMessage::user("hello"),
                ModelMessage::assistant("hi"),
            ],
            config: ModelConfiguration::new("openai", "gpt-4o-mini").with_temperature(0.2),
            context: Default::default(),
        };
        let body = backend.build_request(&request);
        assert_eq!(body.model, "gpt-4o-mini");
        assert_eq!(body.temperature, Some(0.2));
        let roles: Vec<&str> = body.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant"]);
    }

    #[test]
    fn finish_reasons_map() {
        assert_eq!(map_finish_reason(Some("stop")), FinishReason::Completed);
        assert_eq!(map_finish_reason(Some("length")), FinishReason::Length);
        assert_eq!(map_finish_reason(Some("tool_calls")), FinishReason::ToolCall);
        assert_eq!(map_finish_reason(None), FinishReason::Completed);
    }

    #[test]
    fn response_parsing_shape() {
        let raw = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hey"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4},
        });
        let parsed: types::ChatResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content, "hey");
        assert_eq!(parsed.usage.as_ref().unwrap().total_tokens, 4);
    }
}
