//! Proof of Concept: composability patterns across the workspace.
//!
//! Demonstrates the swap points the architecture is built around:
//!
//! 1. **Store swap**: the same session flow over memory, file, and
//!    hybrid backends
//! 2. **Method swap**: the same input through different classification
//!    methods
//! 3. **Pattern swap**: the same task through different workflow
//!    patterns
//! 4. **Gateway pipeline**: security controls wrapping real execution
//!
//! All tests run without network access by using the scripted model
//! backend and the test tools.

use std::sync::Arc;

use keel::test_utils::{EchoTool, RecordingGateway};
use keel::{
    ClassificationMethod, MetadataMap, Pattern, SessionId, SessionStore, SessionTurn,
    ToolGateway, TurnRole, WorkflowState,
};
use tokio_util::sync::CancellationToken;
use trident_classify::{standard_methods, ClassifierConfig, InputClassifier};
use trident_exec::{ExecutorConfig, LocalToolGateway, ToolExecutor};
use trident_provider::{ModelHub, ScriptedModel};
use trident_security::SecurityGateway;
use trident_state_fs::{FsStore, HybridStore};
use trident_state_memory::{MemoryStore, StoreConfig};
use trident_tool::{RegisterOptions, ToolMetadata, ToolRegistry};
use trident_workflow::{EngineConfig, WorkflowEngine};

async fn exercise_store(store: &dyn SessionStore) {
    let session = store
        .create_session("coding", MetadataMap::new())
        .await
        .unwrap();
    let id = session.session_id.clone();
    store
        .append_turn(&id, SessionTurn::new(TurnRole::User, "hello"))
        .await
        .unwrap();
    store
        .append_turn(&id, SessionTurn::new(TurnRole::Assistant, "hi"))
        .await
        .unwrap();

    let loaded = store.get_session(&id).await.unwrap().unwrap();
    assert_eq!(loaded.history.len(), 2);
    assert_eq!(loaded.history[0].role, TurnRole::User);

    store.delete_session(&id).await.unwrap();
    assert!(store.get_session(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn store_swap_same_flow_any_backend() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = StoreConfig::default();

    exercise_store(&MemoryStore::new(config)).await;
    exercise_store(&FsStore::new(&dir.path().join("fs"), config)).await;
    exercise_store(&HybridStore::new(&dir.path().join("hybrid"), config)).await;
}

#[tokio::test]
async fn method_swap_same_input_any_method() {
    let hub = Arc::new(ModelHub::new());
    hub.register(
        "scripted",
        Arc::new(ScriptedModel::always(
            r#"{"kind": "workflow", "confidence": 0.9, "reasoning": "task"}"#,
        )),
    );
    let classifier = InputClassifier::new(
        standard_methods(Arc::clone(&hub), "scripted", "s-1"),
        ClassifierConfig::default(),
    );

    for method in [
        ClassificationMethod::Rule,
        ClassificationMethod::Llm,
        ClassificationMethod::Hybrid,
        ClassificationMethod::Ensemble,
    ] {
        let result = classifier
            .classify("fix the failing test and refactor", Some(method), None)
            .await
            .unwrap();
        assert_eq!(result.kind, keel::InputKind::Workflow, "method {method}");
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    }
}

#[tokio::test]
async fn pattern_swap_same_task_any_dag_pattern() {
    let hub = Arc::new(ModelHub::new());
    hub.register("scripted", Arc::new(ScriptedModel::always("worked")));
    let engine = Arc::new(WorkflowEngine::new(
        Arc::new(RecordingGateway::permissive(&[])) as Arc<dyn ToolGateway>,
        hub,
        EngineConfig::new("scripted", "s-1"),
    ));

    for pattern in [
        Pattern::Analytical,
        Pattern::Creative,
        Pattern::ProblemSolving,
        Pattern::Informational,
        Pattern::Conversational,
    ] {
        let workflow = engine.create_workflow(pattern, vec![]).unwrap();
        let result = engine
            .execute(
                workflow,
                WorkflowState::new("summarize the module", pattern, "coding"),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.final_state.output, "worked", "pattern {pattern}");
        assert!(result.execution_path.len() >= 6);
    }
}

#[tokio::test]
async fn gateway_pipeline_wraps_real_execution() {
    let registry = Arc::new(ToolRegistry::new());
    registry
        .register(
            Arc::new(EchoTool),
            ToolMetadata::in_category("default"),
            RegisterOptions::default(),
        )
        .await
        .unwrap();
    let executor = ToolExecutor::new(Arc::clone(&registry), ExecutorConfig::default());
    let gateway = LocalToolGateway::new(
        Arc::clone(&registry),
        executor,
        Arc::new(SecurityGateway::with_defaults()),
    );

    // Clean input flows through.
    let call = keel::ToolCall::new(
        "echo",
        serde_json::json!({"msg": "fine"}),
        keel::ToolContext::for_session(SessionId::new("s-poc")),
    );
    let result = gateway.run_tool(call).await.unwrap();
    assert!(result.success);

    // Hostile input is stopped before the tool runs.
    let call = keel::ToolCall::new(
        "echo",
        serde_json::json!({"q": "1 UNION SELECT secrets"}),
        keel::ToolContext::for_session(SessionId::new("s-poc")),
    );
    let err = gateway.run_tool(call).await.unwrap_err();
    assert_eq!(err.code, keel::codes::INPUT_BLOCKED);
}
