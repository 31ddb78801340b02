#![deny(missing_docs)]
//! The trident agent dispatcher.
//!
//! [`AgentDispatcher`] is the composition root: it owns the wiring
//! between the input classifier, the command handler, the model hub,
//! and the workflow engine, applies per-phase timeouts, serialises
//! dispatch per session, and records conversation side effects.

mod dispatcher;
mod status;

pub use dispatcher::{AgentDispatcher, DispatcherConfig, StreamEvent, Timeouts};
pub use status::StatusState;

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use keel::test_utils::EchoTool;
    use keel::{
        InputKind, Request, SessionId, SessionStore, SessionTurn, ToolGateway, TurnRole,
    };
    use std::sync::Arc;
    use trident_classify::{standard_methods, ClassifierConfig, InputClassifier};
    use trident_exec::{ExecutorConfig, LocalToolGateway, ToolExecutor};
    use trident_provider::{ModelHub, ScriptRule, ScriptedModel};
    use trident_security::SecurityGateway;
    use trident_state_memory::{MemoryStore, StoreConfig};
    use trident_tool::{RegisterOptions, ToolMetadata, ToolRegistry};
    use trident_workflow::{EngineConfig, ExtractorConfig, WorkflowEngine, WorkflowExtractor};

    async fn assemble(
        rules: Vec<ScriptRule>,
        default_response: &str,
    ) -> (Arc<AgentDispatcher>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new(StoreConfig::default()));
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(
                Arc::new(EchoTool),
                ToolMetadata::in_category("default"),
                RegisterOptions::default(),
            )
            .await
            .unwrap();
        let security = Arc::new(SecurityGateway::with_defaults());
        let executor = ToolExecutor::new(Arc::clone(&registry), ExecutorConfig::default());
        let gateway = Arc::new(LocalToolGateway::new(
            Arc::clone(&registry),
            executor,
            security,
        )) as Arc<dyn ToolGateway>;

        let hub = Arc::new(ModelHub::new());
        hub.register(
            "scripted",
            Arc::new(ScriptedModel::new(rules, default_response)),
        );

        let classifier = InputClassifier::new(
            standard_methods(Arc::clone(&hub), "scripted", "s-1"),
            ClassifierConfig::default(),
        );
        let extractor = WorkflowExtractor::new(
            Arc::clone(&hub),
            ExtractorConfig::standard("scripted", "s-1"),
        );
        let engine = Arc::new(
            WorkflowEngine::new(
                gateway,
                Arc::clone(&hub),
                EngineConfig::new("scripted", "s-1"),
            ),
        );
        let dispatcher = AgentDispatcher::new(
            classifier,
            extractor,
            engine,
            hub,
            store.clone() as Arc<dyn SessionStore>,
            registry,
            DispatcherConfig::new("scripted", "s-1"),
        );
        (dispatcher, store)
    }

    fn request(input: &str, session: &str) -> Request {
        Request::new(input, SessionId::new(session))
    }

    #[tokio::test]
    async fn status_command_reads_without_touching_history() {
        let (dispatcher, store) = assemble(vec![], "hi").await;
        let session = SessionId::new("s-status");
        store.get_or_create_session(&session, "coding").await.unwrap();
        for i in 0..3 {
            store
                .append_turn(&session, SessionTurn::new(TurnRole::User, format!("m{i}")))
                .await
                .unwrap();
        }

        let response = dispatcher.process(request("/status", "s-status")).await;
        assert!(response.success);
        assert_eq!(response.kind, InputKind::Command);
        assert!(response.content.contains("Model:"));
        assert!(response.content.contains("Session:"));
        assert!(response.execution_time.as_millis() < 10_000);

        let history = store.get_session(&session).await.unwrap().unwrap().history;
        assert_eq!(history.len(), 3, "pure reads record no turns");
    }

    #[tokio::test]
    async fn greeting_routes_to_prompt_via_rule() {
        let (dispatcher, store) = assemble(vec![], "hello to you").await;
        let response = dispatcher.process(request("hello", "s-hello")).await;
        assert!(response.success);
        assert_eq!(response.kind, InputKind::Prompt);
        assert_eq!(response.metadata["classification"]["method"], "rule");
        assert_eq!(response.content, "hello to you");

        let history = store
            .get_session(&SessionId::new("s-hello"))
            .await
            .unwrap()
            .unwrap()
            .history;
        assert_eq!(history.len(), 2, "user turn plus one assistant turn");
        assert_eq!(history[1].role, TurnRole::Assistant);
    }

    #[tokio::test]
    async fn task_input_runs_a_workflow_with_tools() {
        let rules = vec![
            ScriptRule {
                pattern: "intent classifier".into(),
                response: r#"{"kind": "workflow", "confidence": 0.9, "reasoning": "tool task"}"#
                    .into(),
            },
            ScriptRule {
                pattern: "observation=".into(),
                response: r#"{"thought": "done", "action": "final", "answer": "null check fixed"}"#
                    .into(),
            },
            ScriptRule {
                pattern: "reason-act-observe".into(),
                response: r#"{"thought": "look at the file", "action": "echo", "input": {"path": "auth.ts"}}"#
                    .into(),
            },
        ];
        let (dispatcher, _store) = assemble(rules, "fallback").await;
        let response = dispatcher
            .process(request(
                "fix the null check in auth.ts and run tests",
                "s-wf",
            ))
            .await;
        assert!(response.success, "error: {:?}", response.error);
        assert_eq!(response.kind, InputKind::Workflow);
        assert_eq!(response.metadata["pattern"], "react");
        assert!(!response.metadata["execution_path"]
            .as_array()
            .unwrap()
            .is_empty());
        assert_eq!(response.tools_used, ["echo"]);
        assert_eq!(response.content, "null check fixed");
    }

    #[tokio::test]
    async fn unextractable_workflow_downgrades_to_prompt() {
        let rules = vec![
            ScriptRule {
                pattern: "intent classifier".into(),
                response: r#"{"kind": "workflow", "confidence": 0.95}"#.into(),
            },
            ScriptRule {
                pattern: "You design workflows".into(),
                response: "no json at all".into(),
            },
        ];
        let (dispatcher, _store) = assemble(rules, "plain prompt answer").await;
        let mut req = request("zzz qqq mystery", "s-down");
        req.options.method = Some(keel::ClassificationMethod::Llm);
        let response = dispatcher.process(req).await;
        assert!(response.success);
        assert_eq!(response.kind, InputKind::Prompt);
        assert_eq!(response.metadata["downgraded_from"], "workflow");
        assert_eq!(response.content, "plain prompt answer");
    }

    #[tokio::test]
    async fn empty_input_is_rejected_before_classification() {
        let (dispatcher, store) = assemble(vec![], "hi").await;
        let response = dispatcher.process(request("   ", "s-empty")).await;
        assert!(!response.success);
        assert_eq!(response.metadata["error_code"], "EMPTY_INPUT");
        assert_eq!(response.metadata["error_category"], "validation");
        assert!(store
            .get_session(&SessionId::new("s-empty"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn failed_command_keeps_user_turn_only() {
        let (dispatcher, store) = assemble(vec![], "hi").await;
        let response = dispatcher.process(request("/frobnicate now", "s-err")).await;
        assert!(!response.success);
        assert_eq!(response.kind, InputKind::Command);
        assert_eq!(response.metadata["error_code"], "UNKNOWN_COMMAND");

        let history = store
            .get_session(&SessionId::new("s-err"))
            .await
            .unwrap()
            .unwrap()
            .history;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, TurnRole::User);
    }

    #[tokio::test]
    async fn mode_command_mutates_the_status_surface() {
        let (dispatcher, _store) = assemble(vec![], "hi").await;
        let set = dispatcher.process(request("/mode editing", "s-mode")).await;
        assert!(set.success);
        let show = dispatcher.process(request("/status", "s-mode")).await;
        assert!(show.content.contains("Mode: editing"));
    }

    #[tokio::test]
    async fn processing_events_are_recorded_on_success() {
        let (dispatcher, store) = assemble(vec![], "hi").await;
        dispatcher.process(request("hello", "s-ev")).await;
        let events = store
            .get_processing_history(&SessionId::new("s-ev"), None)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "prompt");
    }

    #[tokio::test]
    async fn stream_emits_the_full_event_sequence() {
        let (dispatcher, _store) = assemble(vec![], "streamed answer").await;
        let events: Vec<StreamEvent> = dispatcher
            .stream(request("hello", "s-stream"))
            .collect()
            .await;

        assert!(matches!(events[0], StreamEvent::ClassificationStart));
        assert!(matches!(events[1], StreamEvent::ClassificationEnd(_)));
        assert!(matches!(
            events[2],
            StreamEvent::ProcessingStart {
                kind: InputKind::Prompt
            }
        ));
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::Chunk { .. })));
        let Some(StreamEvent::Completed(response)) = events.last() else {
            panic!("stream must end with completion");
        };
        assert_eq!(response.content, "streamed answer");
    }

    #[tokio::test]
    async fn stream_failure_ends_with_single_error_event() {
        let (dispatcher, _store) = assemble(vec![], "hi").await;
        let events: Vec<StreamEvent> = dispatcher
            .stream(request("/frobnicate", "s-stream-err"))
            .collect()
            .await;
        assert!(matches!(events.last(), Some(StreamEvent::Error(_))));
        assert!(!events
            .iter()
            .any(|e| matches!(e, StreamEvent::Completed(_))));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, StreamEvent::Error(_)))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn classification_metadata_always_present_on_routed_responses() {
        let (dispatcher, _store) = assemble(vec![], "hi").await;
        let response = dispatcher.process(request("hello", "s-meta")).await;
        let classification = &response.metadata["classification"];
        assert_eq!(classification["kind"], "prompt");
        assert!(classification["confidence"].as_f64().unwrap() > 0.0);
        assert!(response.metadata["timings"]["classification_ms"].is_u64());
        assert!(response.metadata["agent_processing_time_ms"].is_u64());
    }

    #[tokio::test]
    async fn health_reports_components() {
        let (dispatcher, _store) = assemble(vec![], "hi").await;
        let health = dispatcher.health().await;
        assert_eq!(health["mode"], "ready");
        assert_eq!(health["providers"], serde_json::json!(["scripted"]));
        assert_eq!(health["store"]["ok"], true);
        assert_eq!(health["tools"]["total"], 1);
    }

    #[tokio::test]
    async fn shutdown_clears_tools_and_store() {
        let (dispatcher, _store) = assemble(vec![], "hi").await;
        dispatcher.shutdown().await.unwrap();
        let health = dispatcher.health().await;
        assert_eq!(health["tools"]["total"], 0);
    }
}
