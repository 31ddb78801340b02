//! The workflow engine: compile, execute, stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_stream::{stream, try_stream};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use keel::{
    AgentError, ConversationState, MetadataMap, ModelConfiguration, ModelMessage, ModelRequest,
    NodeKind, NodeSpec, Pattern, SessionId, SessionStore, StatePatch, ToolCall, ToolContext,
    ToolGateway, WorkflowId, WorkflowSpec, WorkflowState,
};
use trident_provider::ModelHub;

use crate::compile::{self, nodes, Customization};
use crate::{adapt, react, rewoo};

/// Engine configuration.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Model used by reasoning nodes and pattern runners.
    pub model: ModelConfiguration,
    /// ReAct step budget.
    pub max_steps: u32,
    /// ADaPT recursion depth budget.
    pub max_decomposition_level: u32,
    /// Persist state after every node into the session store.
    pub checkpointing: bool,
}

impl EngineConfig {
    /// Defaults over the given provider/model.
    pub fn new(provider_id: &str, model_id: &str) -> Self {
        Self {
            model: ModelConfiguration::new(provider_id, model_id),
            max_steps: 10,
            max_decomposition_level: 3,
            checkpointing: false,
        }
    }
}

/// A validated, runnable workflow.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ExecutableWorkflow {
    /// The validated spec.
    pub spec: WorkflowSpec,
}

/// The terminal product of [`WorkflowEngine::execute`].
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    /// The executed workflow's id.
    pub workflow_id: WorkflowId,
    /// Final state after the terminal node.
    pub final_state: WorkflowState,
    /// Node ids in completion order (loops repeat their nodes).
    pub execution_path: Vec<String>,
    /// Number of distinct nodes in the compiled graph.
    pub node_count: usize,
}

/// One streamed progress chunk. The stream ends with exactly one chunk
/// whose `is_complete` is true; an error chunk is terminal and carries
/// `error`.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct WorkflowChunk {
    /// The node that just completed.
    pub node_id: String,
    /// State after that node.
    pub state: WorkflowState,
    /// Terminal marker.
    pub is_complete: bool,
    /// Present on the terminal chunk of a failed run.
    pub error: Option<AgentError>,
}

/// Internal per-node event produced by the runners.
pub(crate) struct NodeEvent {
    pub(crate) node_id: String,
    pub(crate) state: WorkflowState,
}

impl NodeEvent {
    pub(crate) fn new(node_id: impl Into<String>, state: &WorkflowState) -> Self {
        Self {
            node_id: node_id.into(),
            state: state.clone(),
        }
    }
}

/// Bail out of a runner when the request has been cancelled.
pub(crate) fn ensure_live(cancel: &CancellationToken, phase: &str) -> Result<(), AgentError> {
    if cancel.is_cancelled() {
        Err(AgentError::cancelled(phase))
    } else {
        Ok(())
    }
}

/// Compiles patterns into node graphs and runs them with checkpointing
/// and streaming. Tools are reached exclusively through the
/// [`ToolGateway`] seam.
pub struct WorkflowEngine {
    gateway: Arc<dyn ToolGateway>,
    hub: Arc<ModelHub>,
    store: Option<Arc<dyn SessionStore>>,
    config: EngineConfig,
    compiled: Mutex<HashMap<&'static str, WorkflowSpec>>,
}

impl WorkflowEngine {
    /// An engine over the given gateway and model hub.
    pub fn new(gateway: Arc<dyn ToolGateway>, hub: Arc<ModelHub>, config: EngineConfig) -> Self {
        Self {
            gateway,
            hub,
            store: None,
            config,
            compiled: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a session store for checkpoint persistence.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn gateway(&self) -> &Arc<dyn ToolGateway> {
        &self.gateway
    }

    /// Compile a pattern, applying customizations, and validate.
    pub fn create_workflow(
        &self,
        pattern: Pattern,
        customizations: Vec<Customization>,
    ) -> Result<ExecutableWorkflow, AgentError> {
        let base = {
            let cache = self.compiled.lock().expect("compile cache lock");
            cache.get(pattern.name()).cloned()
        };
        let mut spec = match base {
            Some(mut cached) => {
                cached.id = WorkflowId::generate();
                cached
            }
            None => compile::build_pattern_spec(pattern, WorkflowId::generate()),
        };
        if !customizations.is_empty() {
            spec = compile::customize(spec, customizations)?;
        } else {
            spec.validate()?;
        }
        Ok(ExecutableWorkflow { spec })
    }

    /// Wrap an extracted spec, validating it.
    pub fn from_spec(&self, spec: WorkflowSpec) -> Result<ExecutableWorkflow, AgentError> {
        spec.validate()?;
        Ok(ExecutableWorkflow { spec })
    }

    /// Compile and cache the given patterns ahead of time.
    pub fn precompile(&self, patterns: &[Pattern]) {
        let mut cache = self.compiled.lock().expect("compile cache lock");
        for pattern in patterns {
            cache.entry(pattern.name()).or_insert_with(|| {
                compile::build_pattern_spec(*pattern, WorkflowId::new("precompiled"))
            });
        }
    }

    /// A precompiled pattern's spec, by canonical name.
    pub fn get_compiled(&self, pattern_name: &str) -> Option<WorkflowSpec> {
        self.compiled
            .lock()
            .expect("compile cache lock")
            .get(pattern_name)
            .cloned()
    }

    /// Execute to completion by draining the stream; the result's final
    /// state equals the last streamed chunk's state.
    pub async fn execute(
        self: &Arc<Self>,
        workflow: ExecutableWorkflow,
        state: WorkflowState,
        cancel: CancellationToken,
    ) -> Result<WorkflowResult, AgentError> {
        let workflow_id = workflow.spec.id.clone();
        let node_count = workflow.spec.nodes.len();
        let mut stream = Arc::clone(self).stream(workflow, state, cancel);

        let mut path = Vec::new();
        let mut last_state = None;
        while let Some(chunk) = stream.next().await {
            if let Some(error) = chunk.error {
                return Err(error);
            }
            if !chunk.is_complete {
                path.push(chunk.node_id.clone());
            }
            last_state = Some(chunk.state);
        }
        let final_state = last_state.ok_or_else(|| {
            AgentError::system("EMPTY_WORKFLOW", "workflow produced no chunks")
        })?;
        Ok(WorkflowResult {
            workflow_id,
            final_state,
            execution_path: path,
            node_count,
        })
    }

    /// Stream one chunk per completed node, then a terminal chunk.
    pub fn stream(
        self: Arc<Self>,
        workflow: ExecutableWorkflow,
        state: WorkflowState,
        cancel: CancellationToken,
    ) -> BoxStream<'static, WorkflowChunk> {
        let engine = self;
        Box::pin(stream! {
            let spec = workflow.spec;
            let workflow_id = spec.id.clone();
            let session_id = state.context.get("session_id")
                .and_then(|v| v.as_str())
                .map(SessionId::new);
            let initial_state = state.clone();
            let mut inner: BoxStream<'static, Result<NodeEvent, AgentError>> =
                match spec.pattern {
                    Pattern::React => react::run(Arc::clone(&engine), spec, state, cancel.clone()),
                    Pattern::Rewoo => rewoo::run(Arc::clone(&engine), spec, state, cancel.clone()),
                    Pattern::Adapt => adapt::run(Arc::clone(&engine), spec, state, cancel.clone()),
                    _ => engine.clone().run_dag(spec, state, cancel.clone()),
                };

            let mut last_state = initial_state;
            let mut last_node = String::new();
            let mut step_index: usize = 0;
            while let Some(event) = inner.next().await {
                match event {
                    Ok(NodeEvent { node_id, state }) => {
                        if engine.config.checkpointing {
                            engine
                                .checkpoint(&workflow_id, step_index, session_id.as_ref(), &state)
                                .await;
                        }
                        step_index += 1;
                        last_state = state.clone();
                        last_node = node_id.clone();
                        yield WorkflowChunk {
                            node_id,
                            state,
                            is_complete: false,
                            error: None,
                        };
                    }
                    Err(error) => {
                        warn!(workflow = %workflow_id, error = %error, "workflow failed");
                        yield WorkflowChunk {
                            node_id: last_node,
                            state: last_state,
                            is_complete: true,
                            error: Some(error),
                        };
                        return;
                    }
                }
            }
            yield WorkflowChunk {
                node_id: last_node,
                state: last_state,
                is_complete: true,
                error: None,
            };
        })
    }

    async fn checkpoint(
        &self,
        workflow_id: &WorkflowId,
        step_index: usize,
        session_id: Option<&SessionId>,
        state: &WorkflowState,
    ) {
        let (Some(store), Some(session_id)) = (&self.store, session_id) else {
            return;
        };
        let mut conversation = match store.get_conversation_state(session_id).await {
            Ok(Some(conversation)) => conversation,
            Ok(None) => ConversationState::new(session_id.clone()),
            Err(e) => {
                debug!(error = %e, "checkpoint read failed");
                return;
            }
        };
        conversation.checkpoints.insert(
            format!("{workflow_id}/{step_index}"),
            serde_json::to_value(state).unwrap_or_default(),
        );
        conversation.updated_at = chrono::Utc::now();
        if let Err(e) = store.save_conversation_state(conversation).await {
            debug!(error = %e, "checkpoint write failed");
        }
    }

    /// Walk a DAG pattern in topological order.
    fn run_dag(
        self: Arc<Self>,
        spec: WorkflowSpec,
        state: WorkflowState,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<NodeEvent, AgentError>> {
        let engine = self;
        Box::pin(try_stream! {
            let order = spec.topological_order()?;
            let mut state = state;
            for node_id in order {
                ensure_live(&cancel, "workflow")?;
                let node = spec
                    .nodes
                    .iter()
                    .find(|n| n.id == node_id)
                    .expect("ordered node exists")
                    .clone();
                let started = std::time::Instant::now();
                let mut patch = engine.run_dag_node(&node, &spec, &state, &cancel).await?;
                patch.perf.insert(
                    format!("{node_id}_ms"),
                    started.elapsed().as_millis() as f64,
                );
                state.apply(patch);
                yield NodeEvent::new(node_id, &state);
            }
        })
    }

    async fn run_dag_node(
        &self,
        node: &NodeSpec,
        spec: &WorkflowSpec,
        state: &WorkflowState,
        cancel: &CancellationToken,
    ) -> Result<StatePatch, AgentError> {
        match node.id.as_str() {
            nodes::PROCESS_INPUT => {
                let mut patch = StatePatch::step("processed input");
                patch.stage = Some("ingest".to_string());
                patch.context.insert(
                    "input_chars".to_string(),
                    serde_json::json!(state.input.chars().count()),
                );
                Ok(patch)
            }
            nodes::ENRICH_CONTEXT => {
                let mut patch = StatePatch::step("enriched context");
                patch.stage = Some("context".to_string());
                patch
                    .context
                    .insert("pattern".to_string(), state.pattern_name.clone().into());
                patch
                    .context
                    .insert("domain".to_string(), state.domain.clone().into());
                Ok(patch)
            }
            nodes::SEQUENTIAL_THINKING => {
                self.reasoning_node(
                    state,
                    cancel,
                    "Think through the task step by step before acting.",
                    "sequential thinking",
                )
                .await
            }
            nodes::IDEATION => {
                self.reasoning_node(
                    state,
                    cancel,
                    "Generate several distinct approaches to the task and pick the strongest.",
                    "ideation",
                )
                .await
            }
            nodes::DIAGNOSTICS => {
                self.reasoning_node(
                    state,
                    cancel,
                    "List the most likely root causes for the reported problem, most likely first.",
                    "diagnostics",
                )
                .await
            }
            nodes::EXECUTE_TOOLS => self.execute_tools_node(spec, state, cancel).await,
            nodes::REASONING => {
                let tool_summary = summarize_tool_results(state);
                let user = format!("Task: {}\n{tool_summary}", state.input);
                let content = self
                    .model_call(
                        "Reason about the task given the collected evidence.",
                        &user,
                        cancel,
                    )
                    .await?;
                let mut patch = StatePatch::step("reasoned over evidence");
                patch.reasoning = Some(merge_reasoning(&state.reasoning, &content));
                patch.stage = Some("reasoning".to_string());
                Ok(patch)
            }
            nodes::SYNTHESIZE => {
                let user = format!(
                    "Task: {}\nReasoning so far:\n{}\nDraft the final answer.",
                    state.input, state.reasoning
                );
                let draft = self
                    .model_call("Produce a clear, complete answer.", &user, cancel)
                    .await?;
                let mut patch = StatePatch::step("synthesized draft");
                patch.context.insert("draft".to_string(), draft.into());
                Ok(patch)
            }
            nodes::FORMAT_OUTPUT => {
                let output = state
                    .context
                    .get("draft")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| state.reasoning.clone());
                let mut patch = StatePatch::output(output);
                patch.stage = Some("complete".to_string());
                patch.steps.push("formatted output".to_string());
                Ok(patch)
            }
            custom => Ok(custom_node_patch(custom, node.kind)),
        }
    }

    async fn reasoning_node(
        &self,
        state: &WorkflowState,
        cancel: &CancellationToken,
        system: &str,
        step: &str,
    ) -> Result<StatePatch, AgentError> {
        let content = self.model_call(system, &state.input, cancel).await?;
        let mut patch = StatePatch::step(step);
        patch.reasoning = Some(merge_reasoning(&state.reasoning, &content));
        Ok(patch)
    }

    async fn execute_tools_node(
        &self,
        spec: &WorkflowSpec,
        state: &WorkflowState,
        cancel: &CancellationToken,
    ) -> Result<StatePatch, AgentError> {
        let mut patch = StatePatch::step("executed tools");
        patch.stage = Some("tools".to_string());
        if spec.required_tools.is_empty() {
            patch.steps.push("no tools required".to_string());
            return Ok(patch);
        }

        let context = self.tool_context(state, cancel);
        let calls: Vec<ToolCall> = spec
            .required_tools
            .iter()
            .map(|tool| {
                ToolCall::new(
                    tool.clone(),
                    serde_json::json!({ "input": state.input }),
                    context.clone(),
                )
            })
            .collect();
        let results = self.gateway.run_batch(calls).await?;
        for result in &results {
            patch
                .steps
                .push(format!("tool {}: success={}", result.tool_name, result.success));
        }
        patch.tool_results = results;
        Ok(patch)
    }

    /// Build a tool context for this workflow, inheriting cancellation.
    pub(crate) fn tool_context(
        &self,
        state: &WorkflowState,
        cancel: &CancellationToken,
    ) -> ToolContext {
        let session_id = state
            .context
            .get("session_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let mut context = ToolContext::for_session(SessionId::new(session_id));
        context.cancellation = cancel.child_token();
        context
    }

    /// One model call under the engine's configured model, observing
    /// cancellation.
    pub(crate) async fn model_call(
        &self,
        system: &str,
        user: &str,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let request = ModelRequest {
            messages: vec![ModelMessage::system(system), ModelMessage::user(user)],
            config: self.config.model.clone(),
            context: MetadataMap::new(),
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::cancelled("model call")),
            response = self.hub.invoke(request) => Ok(response?.content),
        }
    }
}

fn merge_reasoning(existing: &str, addition: &str) -> String {
    if existing.is_empty() {
        addition.to_string()
    } else {
        format!("{existing}\n{addition}")
    }
}

fn summarize_tool_results(state: &WorkflowState) -> String {
    if state.tool_results.is_empty() {
        return "No tool evidence collected.".to_string();
    }
    let lines: Vec<String> = state
        .tool_results
        .iter()
        .map(|r| {
            let body = r
                .output
                .as_ref()
                .map(|o| o.to_string())
                .or_else(|| r.error.clone())
                .unwrap_or_default();
            format!("- {} ({}): {body}", r.tool_name, if r.success { "ok" } else { "failed" })
        })
        .collect();
    format!("Tool evidence:\n{}", lines.join("\n"))
}

fn custom_node_patch(node_id: &str, kind: NodeKind) -> StatePatch {
    let mut patch = StatePatch::step(format!("ran custom node {node_id}"));
    patch.context.insert(
        format!("custom_{node_id}"),
        serde_json::json!(format!("{kind:?}")),
    );
    patch
}
