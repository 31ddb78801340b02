//! The Model protocol — uniform invoke/stream over LLM backends.
//!
//! Concrete providers live outside the core; the runtime sees only
//! [`ModelBackend`]. Backends are stored as trait objects, so the trait
//! is object-safe: streaming returns a boxed stream rather than an
//! opaque `impl Trait`.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::request::MetadataMap;

/// Role of a message in a model conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    /// Instructions to the model.
    System,
    /// End-user content.
    User,
    /// Prior model output.
    Assistant,
}

/// One message in a model conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMessage {
    /// The author role.
    pub role: ModelRole,
    /// Plain-text content.
    pub content: String,
}

impl ModelMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ModelRole::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ModelRole::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ModelRole::Assistant,
            content: content.into(),
        }
    }
}

/// Capability flags a backend declares and a request may require.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    /// Whether the backend can stream chunks.
    pub supports_streaming: bool,
    /// Whether the backend can emit tool calls.
    pub supports_tool_calling: bool,
    /// Whether the backend honours system messages.
    pub supports_system_messages: bool,
    /// Maximum context window in tokens (0 = unknown).
    pub max_context_length: u32,
    /// Message content types the backend accepts (e.g. "text").
    #[serde(default)]
    pub supported_message_types: Vec<String>,
}

/// Which backend and model to use, plus sampling parameters and the
/// capabilities the request requires of the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfiguration {
    /// Registry id of the backend.
    pub provider_id: String,
    /// Backend-specific model identifier.
    pub model_id: String,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Maximum output tokens.
    pub max_tokens: Option<u32>,
    /// Stop sequences.
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    /// Capabilities this request requires.
    #[serde(default)]
    pub capabilities: ModelCapabilities,
}

impl ModelConfiguration {
    /// A configuration with defaults for everything but the ids.
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            temperature: None,
            max_tokens: None,
            stop_sequences: vec![],
            capabilities: ModelCapabilities::default(),
        }
    }

    /// Set the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A request to a model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Conversation messages, oldest first.
    pub messages: Vec<ModelMessage>,
    /// Backend/model selection and parameters.
    pub config: ModelConfiguration,
    /// Free-form context passed through to the backend.
    #[serde(default)]
    pub context: MetadataMap,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of the response.
    Completed,
    /// Hit the max-token limit.
    Length,
    /// Hit a stop sequence.
    Stop,
    /// The model requested a tool call.
    ToolCall,
}

/// Token accounting for one model call. Backend-reported counts
/// override heuristic estimates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    pub prompt_tokens: u64,
    /// Tokens in the completion.
    pub completion_tokens: u64,
    /// Sum of prompt and completion tokens.
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Build a usage record, computing the total.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A complete model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// The generated text.
    pub content: String,
    /// Why generation stopped.
    pub finish_reason: FinishReason,
    /// Token accounting.
    pub usage: TokenUsage,
}

/// One chunk of a streamed response. A stream ends with exactly one
/// chunk whose `is_complete` is true; that chunk carries final usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelChunk {
    /// New text since the previous chunk (may be empty on the final
    /// chunk).
    pub delta: String,
    /// Whether this is the terminal chunk.
    pub is_complete: bool,
    /// Final usage, present only on the terminal chunk.
    pub usage: Option<TokenUsage>,
}

/// Stream of model chunks.
pub type ModelStream = BoxStream<'static, Result<ModelChunk, AgentError>>;

/// LLM backend interface.
///
/// Implementations wrap one upstream API (or a deterministic script in
/// tests). Endpoints and keys come from the implementation's own
/// configuration, never from the core.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// The capabilities this backend provides.
    fn capabilities(&self) -> ModelCapabilities;

    /// One-shot completion.
    async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse, AgentError>;

    /// Streamed completion. The default implementation adapts `invoke`
    /// into a two-chunk stream for backends without native streaming.
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, AgentError> {
        let response = self.invoke(request).await?;
        let chunks = vec![
            Ok(ModelChunk {
                delta: response.content,
                is_complete: false,
                usage: None,
            }),
            Ok(ModelChunk {
                delta: String::new(),
                is_complete: true,
                usage: Some(response.usage),
            }),
        ];
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_total_is_sum() {
        let u = TokenUsage::new(10, 32);
        assert_eq!(u.total_tokens, 42);
    }

    #[test]
    fn finish_reason_snake_case() {
        assert_eq!(
            serde_json::to_string(&FinishReason::ToolCall).unwrap(),
            "\"tool_call\""
        );
    }

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(ModelMessage::system("x").role, ModelRole::System);
        assert_eq!(ModelMessage::user("x").role, ModelRole::User);
        assert_eq!(ModelMessage::assistant("x").role, ModelRole::Assistant);
    }
}
