//! The model hub: a registry of backends with capability checks and
//! token accounting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use keel::{
    codes, AgentError, ModelBackend, ModelCapabilities, ModelRequest, ModelResponse, ModelStream,
    TokenUsage,
};

/// Process-wide registry of model backends keyed by provider id.
///
/// The hub enforces the request's declared capability requirements
/// before the backend sees the request, and fills in heuristic token
/// counts when a backend reports none. Heuristic counts are memoised
/// per `(model, text)` so identical requests count identically for the
/// life of the process.
pub struct ModelHub {
    backends: Mutex<HashMap<String, Arc<dyn ModelBackend>>>,
    token_cache: Mutex<HashMap<(String, String), u64>>,
}

impl ModelHub {
    /// An empty hub.
    pub fn new() -> Self {
        Self {
            backends: Mutex::new(HashMap::new()),
            token_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Register a backend under a provider id, replacing any previous
    /// registration.
    pub fn register(&self, provider_id: impl Into<String>, backend: Arc<dyn ModelBackend>) {
        self.backends
            .lock()
            .expect("hub lock")
            .insert(provider_id.into(), backend);
    }

    /// Registered provider ids, sorted.
    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.backends.lock().expect("hub lock").keys().cloned().collect();
        ids.sort();
        ids
    }

    fn backend(&self, provider_id: &str) -> Result<Arc<dyn ModelBackend>, AgentError> {
        self.backends
            .lock()
            .expect("hub lock")
            .get(provider_id)
            .cloned()
            .ok_or_else(|| {
                AgentError::configuration(
                    codes::PROVIDER_NOT_FOUND,
                    format!("unknown model provider: {provider_id}"),
                )
            })
    }

    /// One-shot completion through the named backend.
    pub async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse, AgentError> {
        let backend = self.backend(&request.config.provider_id)?;
        check_capabilities(&request.config.capabilities, &backend.capabilities())?;
        let model = request.config.model_id.clone();
        let prompt_text: String = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let mut response = backend.invoke(request).await?;
        if response.usage.total_tokens == 0 {
            // Backend reported nothing; fall back to the heuristic.
            let prompt = self.estimate_tokens(&model, &prompt_text);
            let completion = self.estimate_tokens(&model, &response.content);
            response.usage = TokenUsage::new(prompt, completion);
            debug!(model, prompt, completion, "token usage estimated");
        }
        Ok(response)
    }

    /// Streamed completion through the named backend. The stream ends
    /// with exactly one terminal chunk.
    pub async fn stream(&self, request: ModelRequest) -> Result<ModelStream, AgentError> {
        let backend = self.backend(&request.config.provider_id)?;
        check_capabilities(&request.config.capabilities, &backend.capabilities())?;
        backend.stream(request).await
    }

    /// Deterministic chars/4 token estimate, memoised per
    /// `(model, text)`.
    pub fn estimate_tokens(&self, model: &str, text: &str) -> u64 {
        let key = (model.to_string(), text.to_string());
        let mut cache = self.token_cache.lock().expect("token cache lock");
        *cache
            .entry(key)
            .or_insert_with(|| (text.chars().count() as u64).div_ceil(4))
    }
}

impl Default for ModelHub {
    fn default() -> Self {
        Self::new()
    }
}

fn check_capabilities(
    required: &ModelCapabilities,
    available: &ModelCapabilities,
) -> Result<(), AgentError> {
    let missing = |what: &str| {
        AgentError::configuration(
            codes::CAPABILITY_MISSING,
            format!("backend lacks required capability: {what}"),
        )
    };
    if required.supports_streaming && !available.supports_streaming {
        return Err(missing("streaming"));
    }
    if required.supports_tool_calling && !available.supports_tool_calling {
        return Err(missing("tool calling"));
    }
    if required.supports_system_messages && !available.supports_system_messages {
        return Err(missing("system messages"));
    }
    if required.max_context_length > 0
        && available.max_context_length > 0
        && available.max_context_length < required.max_context_length
    {
        return Err(missing("context length"));
    }
    for kind in &required.supported_message_types {
        if !available.supported_message_types.contains(kind) {
            return Err(missing(&format!("message type {kind}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel::test_utils::EchoModel;
    use keel::{ModelConfiguration, ModelMessage};

    fn request(provider: &str) -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::user("four words of text")],
            config: ModelConfiguration::new(provider, "m-1"),
            context: Default::default(),
        }
    }

    #[tokio::test]
    async fn routes_to_registered_backend() {
        let hub = ModelHub::new();
        hub.register("echo", Arc::new(EchoModel));
        let response = hub.invoke(request("echo")).await.unwrap();
        assert_eq!(response.content, "four words of text");
    }

    #[tokio::test]
    async fn unknown_provider_is_configuration_error() {
        let hub = ModelHub::new();
        let err = hub.invoke(request("ghost")).await.unwrap_err();
        assert_eq!(err.code, codes::PROVIDER_NOT_FOUND);
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn capability_requirements_are_enforced() {
        let hub = ModelHub::new();
        hub.register("echo", Arc::new(EchoModel));
        let mut req = request("echo");
        req.config.capabilities.supports_tool_calling = true;
        let err = hub.invoke(req).await.unwrap_err();
        assert_eq!(err.code, codes::CAPABILITY_MISSING);
    }

    #[tokio::test]
    async fn context_length_requirement_is_enforced() {
        let hub = ModelHub::new();
        hub.register("echo", Arc::new(EchoModel));
        let mut req = request("echo");
        req.config.capabilities.max_context_length = 1_000_000;
        assert!(hub.invoke(req).await.is_err());
    }

    #[test]
    fn token_estimates_are_deterministic() {
        let hub = ModelHub::new();
        let a = hub.estimate_tokens("m", "some text to count");
        let b = hub.estimate_tokens("m", "some text to count");
        assert_eq!(a, b);
        assert_eq!(hub.estimate_tokens("m", ""), 0);
        assert_eq!(hub.estimate_tokens("m", "abcd"), 1);
        assert_eq!(hub.estimate_tokens("m", "abcde"), 2);
    }
}
