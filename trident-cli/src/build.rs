//! Wires the runtime together from CLI options.

use std::path::PathBuf;
use std::sync::Arc;

use clap::ValueEnum;

use keel::{AgentError, ModelBackend, SessionStore, ToolGateway};
use trident_classify::{standard_methods, ClassifierConfig, InputClassifier};
use trident_dispatch::{AgentDispatcher, DispatcherConfig};
use trident_exec::{ExecutorConfig, LocalToolGateway, ToolExecutor};
use trident_provider::{ModelHub, ScriptedModel};
use trident_provider_openai::{OpenAiBackend, OpenAiConfig};
use trident_security::SecurityGateway;
use trident_state_fs::{FsStore, HybridStore};
use trident_state_memory::{MemoryStore, StoreConfig};
use trident_tool::ToolRegistry;
use trident_workflow::{EngineConfig, ExtractorConfig, WorkflowEngine, WorkflowExtractor};

/// Which session store backs the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreMode {
    /// Ephemeral in-memory store.
    Memory,
    /// One JSON file per session under the storage root.
    File,
    /// Memory-speed reads over the file store.
    Hybrid,
}

/// Which model backend answers requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    /// Deterministic canned responses; no network.
    Scripted,
    /// OpenAI-compatible chat-completions endpoint.
    Openai,
}

pub struct BuildOptions {
    pub store: StoreMode,
    pub storage_root: Option<PathBuf>,
    pub provider: ProviderKind,
    pub model: String,
    pub api_key: Option<String>,
}

/// Assemble the full dispatcher stack.
pub async fn dispatcher(options: BuildOptions) -> Result<Arc<AgentDispatcher>, AgentError> {
    let store = build_store(&options)?;
    let registry = Arc::new(ToolRegistry::new());
    let security = Arc::new(SecurityGateway::with_defaults());
    let executor = ToolExecutor::new(Arc::clone(&registry), ExecutorConfig::default());
    let gateway = Arc::new(LocalToolGateway::new(
        Arc::clone(&registry),
        executor,
        security,
    )) as Arc<dyn ToolGateway>;

    let (provider_id, backend): (&str, Arc<dyn ModelBackend>) = match options.provider {
        ProviderKind::Scripted => (
            "scripted",
            Arc::new(ScriptedModel::always(
                "This is the scripted demo backend. Configure --provider openai for live replies.",
            )),
        ),
        ProviderKind::Openai => {
            let api_key = options.api_key.clone().ok_or_else(|| {
                AgentError::configuration(
                    "MISSING_API_KEY",
                    "the openai provider needs --api-key or TRIDENT_API_KEY",
                )
            })?;
            ("openai", Arc::new(OpenAiBackend::new(OpenAiConfig::new(api_key))))
        }
    };
    let hub = Arc::new(ModelHub::new());
    hub.register(provider_id, backend);

    let classifier = InputClassifier::new(
        standard_methods(Arc::clone(&hub), provider_id, &options.model),
        ClassifierConfig::default(),
    );
    let extractor = WorkflowExtractor::new(
        Arc::clone(&hub),
        ExtractorConfig::standard(provider_id, &options.model),
    );
    let engine = Arc::new(
        WorkflowEngine::new(
            gateway,
            Arc::clone(&hub),
            EngineConfig::new(provider_id, &options.model),
        )
        .with_store(Arc::clone(&store)),
    );
    engine.precompile(keel::Pattern::all());

    Ok(AgentDispatcher::new(
        classifier,
        extractor,
        engine,
        hub,
        store,
        registry,
        DispatcherConfig::new(provider_id, &options.model),
    ))
}

fn build_store(options: &BuildOptions) -> Result<Arc<dyn SessionStore>, AgentError> {
    let config = StoreConfig::default();
    match options.store {
        StoreMode::Memory => {
            let store = Arc::new(MemoryStore::new(config));
            store.start_cleanup();
            Ok(store)
        }
        StoreMode::File => {
            let root = storage_root(options)?;
            Ok(Arc::new(FsStore::new(&root, config)))
        }
        StoreMode::Hybrid => {
            let root = storage_root(options)?;
            Ok(Arc::new(HybridStore::new(&root, config)))
        }
    }
}

fn storage_root(options: &BuildOptions) -> Result<PathBuf, AgentError> {
    options.storage_root.clone().ok_or_else(|| {
        AgentError::configuration(
            "MISSING_STORAGE_ROOT",
            "file and hybrid stores need --storage-root or TRIDENT_STORAGE_ROOT",
        )
    })
}
