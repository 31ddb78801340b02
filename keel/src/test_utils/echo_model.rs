//! EchoModel — returns the last user message as the completion.

use async_trait::async_trait;

use crate::error::AgentError;
use crate::model::{
    FinishReason, ModelBackend, ModelCapabilities, ModelRequest, ModelResponse, ModelRole,
    TokenUsage,
};

/// A model backend that echoes the last user message back as its
/// completion. Used for testing classification, dispatch, and workflow
/// plumbing without a live backend.
pub struct EchoModel;

#[async_trait]
impl ModelBackend for EchoModel {
    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            supports_streaming: true,
            supports_tool_calling: false,
            supports_system_messages: true,
            max_context_length: 8192,
            supported_message_types: vec!["text".to_string()],
        }
    }

    async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse, AgentError> {
        let content = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ModelRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let usage = TokenUsage::new(
            request.messages.iter().map(|m| m.content.len() as u64 / 4).sum(),
            content.len() as u64 / 4,
        );
        Ok(ModelResponse {
            content,
            finish_reason: FinishReason::Completed,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelConfiguration, ModelMessage};
    use futures_util::StreamExt;

    fn request(text: &str) -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::user(text)],
            config: ModelConfiguration::new("echo", "echo-1"),
            context: Default::default(),
        }
    }

    #[tokio::test]
    async fn echoes_last_user_message() {
        let response = EchoModel.invoke(request("hello")).await.unwrap();
        assert_eq!(response.content, "hello");
        assert_eq!(response.finish_reason, FinishReason::Completed);
    }

    #[tokio::test]
    async fn default_stream_ends_with_complete_chunk() {
        let mut stream = EchoModel.stream(request("hi")).await.unwrap();
        let mut chunks = vec![];
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.unwrap());
        }
        assert!(chunks.last().unwrap().is_complete);
        assert_eq!(chunks.iter().filter(|c| c.is_complete).count(), 1);
    }
}
