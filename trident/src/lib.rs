#![deny(missing_docs)]
//! # trident — umbrella crate
//!
//! One import surface for the trident agent runtime. Re-exports the
//! member crates behind feature flags, plus a `prelude` for the happy
//! path of composing a dispatcher.

#[cfg(feature = "core")]
pub use keel;
#[cfg(feature = "classify")]
pub use trident_classify;
#[cfg(feature = "command")]
pub use trident_command;
#[cfg(feature = "dispatch")]
pub use trident_dispatch;
#[cfg(feature = "core")]
pub use trident_exec;
#[cfg(feature = "core")]
pub use trident_provider;
#[cfg(feature = "provider-openai")]
pub use trident_provider_openai;
#[cfg(feature = "core")]
pub use trident_security;
#[cfg(feature = "state-fs")]
pub use trident_state_fs;
#[cfg(feature = "state-memory")]
pub use trident_state_memory;
#[cfg(feature = "core")]
pub use trident_tool;
#[cfg(feature = "workflow")]
pub use trident_workflow;

/// Happy-path imports for composing a trident agent.
pub mod prelude {
    #[cfg(feature = "core")]
    pub use keel::{
        AgentError, ClassificationMethod, ClassificationResult, ErrorCategory, InputKind,
        ModelBackend, ModelConfiguration, Pattern, Request, Response, Session, SessionId,
        SessionStore, Tool, ToolCall, ToolGateway, ToolResult, WorkflowId, WorkflowSpec,
        WorkflowState,
    };

    #[cfg(feature = "core")]
    pub use trident_exec::{ExecutorConfig, LocalToolGateway, ToolExecutor};
    #[cfg(feature = "core")]
    pub use trident_provider::{ModelHub, ScriptedModel};
    #[cfg(feature = "core")]
    pub use trident_security::{SecurityConfig, SecurityGateway};
    #[cfg(feature = "core")]
    pub use trident_tool::{RegisterOptions, ToolMetadata, ToolRegistry};

    #[cfg(feature = "classify")]
    pub use trident_classify::{standard_methods, ClassifierConfig, InputClassifier};

    #[cfg(feature = "command")]
    pub use trident_command::{AgentMode, CommandHandler, StatusSurface};

    #[cfg(feature = "workflow")]
    pub use trident_workflow::{
        EngineConfig, ExtractorConfig, WorkflowEngine, WorkflowExtractor,
    };

    #[cfg(feature = "dispatch")]
    pub use trident_dispatch::{AgentDispatcher, DispatcherConfig, StreamEvent, Timeouts};

    #[cfg(feature = "state-memory")]
    pub use trident_state_memory::{MemoryStore, StoreConfig};

    #[cfg(feature = "state-fs")]
    pub use trident_state_fs::{FsStore, HybridStore};

    #[cfg(feature = "provider-openai")]
    pub use trident_provider_openai::{OpenAiBackend, OpenAiConfig};
}
