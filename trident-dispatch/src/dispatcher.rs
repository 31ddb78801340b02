//! The agent dispatcher: the runtime's composition root.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use keel::{
    codes, AgentError, ClassificationMethod, ClassificationResult, DurationMs, InputKind,
    MetadataMap, ModelConfiguration, ModelMessage, ModelRequest, ModelRole, Pattern, Request,
    Response, SessionId, SessionStore, SessionTurn, TurnRole, WorkflowId, WorkflowState,
};
use trident_classify::InputClassifier;
use trident_command::{parse_command, CommandHandler, CommandOutcome};
use trident_provider::ModelHub;
use trident_tool::ToolRegistry;
use trident_workflow::{WorkflowEngine, WorkflowExtractor};

use crate::status::StatusState;

/// Per-phase deadlines.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Classification phase.
    pub classification: DurationMs,
    /// Command execution.
    pub command_execution: DurationMs,
    /// Prompt (direct model) handling.
    pub prompt_processing: DurationMs,
    /// Whole-workflow execution, extraction included.
    pub workflow_execution: DurationMs,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            classification: DurationMs::from_secs(5),
            command_execution: DurationMs::from_secs(30),
            prompt_processing: DurationMs::from_secs(120),
            workflow_execution: DurationMs::from_secs(600),
        }
    }
}

/// Dispatcher configuration.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Per-phase deadlines.
    pub timeouts: Timeouts,
    /// Domain tag stamped on new sessions.
    pub domain: String,
    /// Command prefix.
    pub command_prefix: String,
    /// How many history turns feed the prompt handler.
    pub history_window: usize,
    /// Provider and model for the prompt handler (the model id can be
    /// switched at runtime with `/model`).
    pub model: ModelConfiguration,
}

impl DispatcherConfig {
    /// Defaults over the given provider/model.
    pub fn new(provider_id: &str, model_id: &str) -> Self {
        Self {
            timeouts: Timeouts::default(),
            domain: "coding".to_string(),
            command_prefix: "/".to_string(),
            history_window: 20,
            model: ModelConfiguration::new(provider_id, model_id),
        }
    }
}

/// Events emitted by [`AgentDispatcher::stream`].
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Classification is starting.
    ClassificationStart,
    /// Classification finished.
    ClassificationEnd(ClassificationResult),
    /// The selected handler is starting.
    ProcessingStart {
        /// Which handler runs.
        kind: InputKind,
    },
    /// One unit of handler progress: a model delta or a completed
    /// workflow node.
    Chunk {
        /// Progress content.
        content: String,
        /// Chunk detail (node id, pattern).
        metadata: MetadataMap,
    },
    /// Terminal success event.
    Completed(Response),
    /// Terminal failure event. No `Completed` follows.
    Error(AgentError),
}

/// Orchestrates classifier, command handler, prompt handler, and
/// workflow engine under per-phase timeouts with per-session serial
/// dispatch.
pub struct AgentDispatcher {
    classifier: InputClassifier,
    commands: CommandHandler,
    extractor: WorkflowExtractor,
    engine: Arc<WorkflowEngine>,
    hub: Arc<ModelHub>,
    store: Arc<dyn SessionStore>,
    registry: Arc<ToolRegistry>,
    status: Arc<StatusState>,
    config: DispatcherConfig,
    shutdown: CancellationToken,
    session_locks: tokio::sync::Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl AgentDispatcher {
    /// Compose the dispatcher. This is the only place the concrete
    /// subsystems meet.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        classifier: InputClassifier,
        extractor: WorkflowExtractor,
        engine: Arc<WorkflowEngine>,
        hub: Arc<ModelHub>,
        store: Arc<dyn SessionStore>,
        registry: Arc<ToolRegistry>,
        config: DispatcherConfig,
    ) -> Arc<Self> {
        let snapshot = serde_json::json!({
            "domain": config.domain,
            "command_prefix": config.command_prefix,
            "history_window": config.history_window,
            "timeouts": {
                "classification_ms": config.timeouts.classification,
                "command_execution_ms": config.timeouts.command_execution,
                "prompt_processing_ms": config.timeouts.prompt_processing,
                "workflow_execution_ms": config.timeouts.workflow_execution,
            },
            "model": { "provider": config.model.provider_id, "model": config.model.model_id },
        });
        let status = Arc::new(StatusState::new(
            config.model.provider_id.clone(),
            config.model.model_id.clone(),
            Arc::clone(&store),
            Arc::clone(&registry),
            snapshot,
        ));
        let commands = CommandHandler::new(
            Arc::clone(&store),
            Arc::clone(&status) as Arc<dyn trident_command::StatusSurface>,
        );
        Arc::new(Self {
            classifier,
            commands,
            extractor,
            engine,
            hub,
            store,
            registry,
            status,
            config,
            shutdown: CancellationToken::new(),
            session_locks: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// The status surface (for embedding and tests).
    pub fn status_state(&self) -> &Arc<StatusState> {
        &self.status
    }

    /// Process one request to a response. Errors become error
    /// responses; this method does not fail.
    pub async fn process(&self, request: Request) -> Response {
        self.process_cancellable(request, self.shutdown.child_token())
            .await
    }

    /// Process with an externally controlled cancellation token. The
    /// token fans out to the classifier, model calls, tool executions,
    /// and workflow iteration.
    pub async fn process_cancellable(
        &self,
        request: Request,
        cancel: CancellationToken,
    ) -> Response {
        let total_start = Instant::now();
        let session_id = request.context.session_id.clone();
        let lock = self.session_lock(&session_id).await;
        let _guard = lock.lock().await;
        self.status.record_request();

        let input = request.input.trim().to_string();
        if input.is_empty() {
            let error = AgentError::validation("EMPTY_INPUT", "input is empty");
            return finish_response(
                Response::from_error(InputKind::Prompt, &error),
                total_start,
            );
        }

        // Built-in state commands bypass classification and leave the
        // conversation history untouched.
        if let Some(response) = self.try_builtin(&input, &session_id).await {
            return finish_response(response, total_start);
        }

        if let Err(error) = self.ingress(&session_id, &input).await {
            return finish_response(Response::from_error(InputKind::Prompt, &error), total_start);
        }

        let classify_start = Instant::now();
        let classification = match self.classify(&request, &input, &cancel).await {
            Ok(classification) => classification,
            Err(error) => {
                return finish_response(
                    Response::from_error(InputKind::Prompt, &error),
                    total_start,
                );
            }
        };
        let classification_ms = classify_start.elapsed().as_millis() as u64;
        info!(
            kind = %classification.kind,
            confidence = classification.confidence,
            method = %classification.method,
            "input classified"
        );

        let processing_start = Instant::now();
        let mut response = match classification.kind {
            InputKind::Command => self.handle_command(&input, &session_id, &cancel).await,
            InputKind::Prompt => self.handle_prompt(&session_id, &cancel).await,
            InputKind::Workflow => self.handle_workflow(&input, &session_id, &cancel).await,
        };
        let processing_ms = processing_start.elapsed().as_millis() as u64;

        merge_classification_metadata(
            &mut response,
            &classification,
            classification_ms,
            processing_ms,
        );

        if response.success {
            self.record_success(&session_id, &response).await;
        }
        finish_response(response, total_start)
    }

    /// Stream a request's progress. Emits classification-start/end,
    /// processing-start, handler chunks, and completion; a failure ends
    /// the stream with a single error event instead.
    pub fn stream(self: &Arc<Self>, request: Request) -> BoxStream<'static, StreamEvent> {
        let this = Arc::clone(self);
        let cancel = self.shutdown.child_token();
        Box::pin(stream! {
            let total_start = Instant::now();
            let session_id = request.context.session_id.clone();
            let lock = this.session_lock(&session_id).await;
            let _guard = lock.lock_owned().await;
            this.status.record_request();

            let input = request.input.trim().to_string();
            if input.is_empty() {
                yield StreamEvent::Error(AgentError::validation("EMPTY_INPUT", "input is empty"));
                return;
            }

            if let Some(response) = this.try_builtin(&input, &session_id).await {
                yield StreamEvent::ClassificationStart;
                yield StreamEvent::ClassificationEnd(builtin_classification());
                yield StreamEvent::ProcessingStart { kind: InputKind::Command };
                if response.success {
                    yield StreamEvent::Chunk {
                        content: response.content.clone(),
                        metadata: MetadataMap::new(),
                    };
                    yield StreamEvent::Completed(finish_response(response, total_start));
                } else {
                    yield StreamEvent::Error(response_error(&response));
                }
                return;
            }

            if let Err(error) = this.ingress(&session_id, &input).await {
                yield StreamEvent::Error(error);
                return;
            }

            yield StreamEvent::ClassificationStart;
            let classify_start = Instant::now();
            let classification = match this.classify(&request, &input, &cancel).await {
                Ok(classification) => classification,
                Err(error) => {
                    yield StreamEvent::Error(error);
                    return;
                }
            };
            let classification_ms = classify_start.elapsed().as_millis() as u64;
            yield StreamEvent::ClassificationEnd(classification.clone());
            yield StreamEvent::ProcessingStart { kind: classification.kind };

            let processing_start = Instant::now();
            let mut response = match classification.kind {
                InputKind::Command => {
                    let response = this.handle_command(&input, &session_id, &cancel).await;
                    if response.success {
                        yield StreamEvent::Chunk {
                            content: response.content.clone(),
                            metadata: MetadataMap::new(),
                        };
                    }
                    response
                }
                InputKind::Prompt => {
                    match this.stream_prompt(&session_id, &cancel).await {
                        Ok(mut chunks) => {
                            let mut content = String::new();
                            let mut failed = None;
                            while let Some(chunk) = chunks.next().await {
                                match chunk {
                                    Ok(chunk) => {
                                        if !chunk.delta.is_empty() {
                                            content.push_str(&chunk.delta);
                                            yield StreamEvent::Chunk {
                                                content: chunk.delta.clone(),
                                                metadata: MetadataMap::new(),
                                            };
                                        }
                                    }
                                    Err(error) => {
                                        failed = Some(error);
                                        break;
                                    }
                                }
                            }
                            match failed {
                                Some(error) => Response::from_error(InputKind::Prompt, &error),
                                None => Response::ok(InputKind::Prompt, content),
                            }
                        }
                        Err(error) => Response::from_error(InputKind::Prompt, &error),
                    }
                }
                InputKind::Workflow => {
                    match this.start_workflow_stream(&input, &session_id, &cancel).await {
                        WorkflowStart::Downgraded(response) | WorkflowStart::Failed(response) => {
                            response
                        }
                        WorkflowStart::Streaming {
                            pattern,
                            workflow_id,
                            node_count,
                            mut chunks,
                        } => {
                            let deadline = this.config.timeouts.workflow_execution.to_std();
                            let started = Instant::now();
                            let mut path = vec![];
                            let mut final_state = None;
                            let mut failure = None;
                            loop {
                                let remaining = deadline.saturating_sub(started.elapsed());
                                let next = tokio::time::timeout(remaining, chunks.next()).await;
                                let chunk = match next {
                                    Ok(Some(chunk)) => chunk,
                                    Ok(None) => break,
                                    Err(_) => {
                                        failure = Some(AgentError::timeout(
                                            "workflow execution",
                                            this.config.timeouts.workflow_execution,
                                        ));
                                        break;
                                    }
                                };
                                if let Some(error) = chunk.error {
                                    failure = Some(error);
                                    break;
                                }
                                if !chunk.is_complete {
                                    path.push(chunk.node_id.clone());
                                    let mut metadata = MetadataMap::new();
                                    metadata.insert(
                                        "node_id".to_string(),
                                        chunk.node_id.clone().into(),
                                    );
                                    metadata
                                        .insert("pattern".to_string(), pattern.name().into());
                                    yield StreamEvent::Chunk {
                                        content: format!("node {} completed", chunk.node_id),
                                        metadata,
                                    };
                                }
                                final_state = Some(chunk.state);
                            }
                            match (failure, final_state) {
                                (Some(error), _) => {
                                    Response::from_error(InputKind::Workflow, &error)
                                }
                                (None, Some(final_state)) => workflow_response(
                                    final_state,
                                    workflow_id,
                                    path,
                                    node_count,
                                    pattern,
                                ),
                                (None, None) => Response::from_error(
                                    InputKind::Workflow,
                                    &AgentError::system(
                                        "EMPTY_WORKFLOW",
                                        "workflow produced no chunks",
                                    ),
                                ),
                            }
                        }
                    }
                }
            };
            let processing_ms = processing_start.elapsed().as_millis() as u64;
            merge_classification_metadata(
                &mut response,
                &classification,
                classification_ms,
                processing_ms,
            );

            if response.success {
                this.record_success(&session_id, &response).await;
                yield StreamEvent::Completed(finish_response(response, total_start));
            } else {
                yield StreamEvent::Error(response_error(&response));
            }
        })
    }

    /// Cancel in-flight work, stop background tasks, and release tool
    /// resources.
    pub async fn shutdown(&self) -> Result<(), AgentError> {
        info!("dispatcher shutting down");
        self.shutdown.cancel();
        self.registry.clear().await;
        self.store.shutdown().await
    }

    /// Component health for the CLI.
    pub async fn health(&self) -> serde_json::Value {
        let store = self.store.statistics().await;
        let status = trident_command::StatusSurface::status(self.status.as_ref()).await;
        serde_json::json!({
            "mode": status.mode,
            "model": { "provider": status.provider_id, "model": status.model_id },
            "uptime_ms": status.uptime,
            "requests_processed": status.requests_processed,
            "tools": self.registry.stats().await,
            "store": match store {
                Ok(stats) => serde_json::json!({ "ok": true, "statistics": stats }),
                Err(e) => serde_json::json!({ "ok": false, "error": e.to_string() }),
            },
            "providers": self.hub.provider_ids(),
        })
    }

    async fn session_lock(&self, session_id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        // Drop locks nothing else holds so the map tracks live
        // sessions, not every session ever seen.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(session_id.clone()).or_default())
    }

    async fn ingress(&self, session_id: &SessionId, input: &str) -> Result<(), AgentError> {
        self.store
            .get_or_create_session(session_id, &self.config.domain)
            .await?;
        self.store
            .append_turn(session_id, SessionTurn::new(TurnRole::User, input))
            .await
    }

    async fn try_builtin(&self, input: &str, session_id: &SessionId) -> Option<Response> {
        let parsed = parse_command(input, &self.config.command_prefix).ok()?;
        if !CommandHandler::is_builtin(&parsed.name) {
            return None;
        }
        // Make sure the session exists so `/status` and `/session`
        // have something to report, without recording any turns.
        if let Err(e) = self
            .store
            .get_or_create_session(session_id, &self.config.domain)
            .await
        {
            return Some(Response::from_error(InputKind::Command, &e));
        }
        let outcome = with_timeout(
            self.config.timeouts.command_execution,
            "command execution",
            self.commands.execute(parsed, session_id),
        )
        .await;
        Some(match outcome {
            Ok(outcome) => {
                let mut response = command_response(outcome);
                response.confidence = 1.0;
                response
                    .metadata
                    .insert("builtin".to_string(), true.into());
                response.metadata.insert(
                    "classification".to_string(),
                    serde_json::to_value(builtin_classification()).unwrap_or_default(),
                );
                response
            }
            Err(error) => Response::from_error(InputKind::Command, &error),
        })
    }

    async fn classify(
        &self,
        request: &Request,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<ClassificationResult, AgentError> {
        let method = request.options.method;
        tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::cancelled("classification")),
            result = with_timeout(
                self.config.timeouts.classification,
                "classification",
                self.classifier.classify(input, method, None),
            ) => result,
        }
    }

    async fn handle_command(
        &self,
        input: &str,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> Response {
        let parsed = match parse_command(input, &self.config.command_prefix) {
            Ok(parsed) => parsed,
            Err(error) => return Response::from_error(InputKind::Command, &error),
        };
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::cancelled("command execution")),
            outcome = with_timeout(
                self.config.timeouts.command_execution,
                "command execution",
                self.commands.execute(parsed, session_id),
            ) => outcome,
        };
        match outcome {
            Ok(outcome) => command_response(outcome),
            Err(error) => Response::from_error(InputKind::Command, &error),
        }
    }

    async fn prompt_request(&self, session_id: &SessionId) -> Result<ModelRequest, AgentError> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| {
                AgentError::system(codes::SESSION_NOT_FOUND, "session vanished mid-request")
            })?;
        let mut messages = vec![ModelMessage::system(
            "You are a helpful coding assistant. Answer directly and concisely.",
        )];
        let window = session
            .history
            .len()
            .saturating_sub(self.config.history_window);
        for turn in &session.history[window..] {
            let role = match turn.role {
                TurnRole::User => ModelRole::User,
                TurnRole::Assistant => ModelRole::Assistant,
                TurnRole::System => ModelRole::System,
            };
            messages.push(ModelMessage {
                role,
                content: turn.content.clone(),
            });
        }
        let mut config = self.config.model.clone();
        config.model_id = self.status.model_id().await;
        Ok(ModelRequest {
            messages,
            config,
            context: MetadataMap::new(),
        })
    }

    async fn handle_prompt(&self, session_id: &SessionId, cancel: &CancellationToken) -> Response {
        let request = match self.prompt_request(session_id).await {
            Ok(request) => request,
            Err(error) => return Response::from_error(InputKind::Prompt, &error),
        };
        let model_id = request.config.model_id.clone();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::cancelled("prompt processing")),
            outcome = with_timeout(
                self.config.timeouts.prompt_processing,
                "prompt processing",
                self.hub.invoke(request),
            ) => outcome,
        };
        match outcome {
            Ok(model_response) => {
                let mut response = Response::ok(InputKind::Prompt, model_response.content);
                response.metadata.insert(
                    "usage".to_string(),
                    serde_json::to_value(model_response.usage).unwrap_or_default(),
                );
                response.metadata.insert("model".to_string(), model_id.into());
                response
            }
            Err(error) => Response::from_error(InputKind::Prompt, &error),
        }
    }

    async fn stream_prompt(
        &self,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> Result<keel::ModelStream, AgentError> {
        let request = self.prompt_request(session_id).await?;
        tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::cancelled("prompt processing")),
            stream = self.hub.stream(request) => stream,
        }
    }

    async fn handle_workflow(
        &self,
        input: &str,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> Response {
        let deadline = self.config.timeouts.workflow_execution;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::cancelled("workflow execution")),
            outcome = with_timeout(
                deadline,
                "workflow execution",
                self.run_workflow(input, session_id, cancel),
            ) => outcome,
        };
        match outcome {
            Ok(response) => response,
            Err(error) => Response::from_error(InputKind::Workflow, &error),
        }
    }

    /// Extract and execute. Extraction failure downgrades to the
    /// prompt handler rather than failing the request.
    async fn run_workflow(
        &self,
        input: &str,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> Result<Response, AgentError> {
        let extraction = self.extractor.extract(input, None).await;
        let Some(spec) = extraction.spec.filter(|_| extraction.success) else {
            warn!(
                error = extraction.error.as_deref().unwrap_or("unknown"),
                "workflow extraction failed; downgrading to prompt"
            );
            let mut response = self.handle_prompt(session_id, cancel).await;
            response
                .metadata
                .insert("downgraded_from".to_string(), "workflow".into());
            if let Some(error) = extraction.error {
                response
                    .metadata
                    .insert("extraction_error".to_string(), error.into());
            }
            return Ok(response);
        };

        let pattern = spec.pattern;
        let workflow = self.engine.from_spec(spec)?;
        let mut state = WorkflowState::new(input, pattern, &self.config.domain);
        state
            .context
            .insert("session_id".to_string(), session_id.as_str().into());
        let result = self
            .engine
            .execute(workflow, state, cancel.child_token())
            .await?;

        let mut response = workflow_response(
            result.final_state,
            result.workflow_id,
            result.execution_path,
            result.node_count,
            pattern,
        );
        if let Some(mode) = extraction.mode {
            response.metadata.insert("mode".to_string(), mode.into());
        }
        Ok(response)
    }

    /// Begin streamed workflow handling: extraction and compilation
    /// happen here; node chunks flow back to the caller's loop.
    async fn start_workflow_stream(
        &self,
        input: &str,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> WorkflowStart {
        let extraction = self.extractor.extract(input, None).await;
        let Some(spec) = extraction.spec.filter(|_| extraction.success) else {
            let mut response = self.handle_prompt(session_id, cancel).await;
            response
                .metadata
                .insert("downgraded_from".to_string(), "workflow".into());
            if let Some(error) = extraction.error {
                response
                    .metadata
                    .insert("extraction_error".to_string(), error.into());
            }
            return WorkflowStart::Downgraded(response);
        };

        let pattern = spec.pattern;
        let workflow = match self.engine.from_spec(spec) {
            Ok(workflow) => workflow,
            Err(error) => {
                return WorkflowStart::Failed(Response::from_error(InputKind::Workflow, &error));
            }
        };
        let workflow_id = workflow.spec.id.clone();
        let node_count = workflow.spec.nodes.len();
        let mut state = WorkflowState::new(input, pattern, &self.config.domain);
        state
            .context
            .insert("session_id".to_string(), session_id.as_str().into());
        WorkflowStart::Streaming {
            pattern,
            workflow_id,
            node_count,
            chunks: Arc::clone(&self.engine).stream(workflow, state, cancel.child_token()),
        }
    }

    async fn record_success(&self, session_id: &SessionId, response: &Response) {
        let mut turn = SessionTurn::new(TurnRole::Assistant, response.content.clone());
        turn.metadata
            .insert("kind".to_string(), response.kind.to_string().into());
        if let Err(e) = self.store.append_turn(session_id, turn).await {
            warn!(error = %e, "failed to append assistant turn");
        }
        let event_kind = match response.kind {
            InputKind::Command => "command",
            InputKind::Prompt => "prompt",
            InputKind::Workflow => "workflow_execution",
        };
        let event = keel::ProcessingEvent::new(
            session_id.clone(),
            event_kind,
            serde_json::json!({
                "success": response.success,
                "tools_used": response.tools_used,
                "metadata": response.metadata,
            }),
        );
        if let Err(e) = self.store.add_processing_event(event).await {
            warn!(error = %e, "failed to append processing event");
        }
    }
}

async fn with_timeout<T>(
    limit: DurationMs,
    phase: &str,
    operation: impl std::future::Future<Output = Result<T, AgentError>>,
) -> Result<T, AgentError> {
    match tokio::time::timeout(limit.to_std(), operation).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::timeout(phase, limit)),
    }
}

fn finish_response(mut response: Response, total_start: Instant) -> Response {
    response.execution_time = DurationMs::from(total_start.elapsed());
    response.metadata.insert(
        "agent_processing_time_ms".to_string(),
        response.execution_time.as_millis().into(),
    );
    response
}

fn merge_classification_metadata(
    response: &mut Response,
    classification: &ClassificationResult,
    classification_ms: u64,
    processing_ms: u64,
) {
    response.confidence = classification.confidence;
    response.metadata.insert(
        "classification".to_string(),
        serde_json::json!({
            "kind": classification.kind,
            "confidence": classification.confidence,
            "method": classification.method,
        }),
    );
    for (key, value) in &classification.metadata {
        response
            .metadata
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
    response.metadata.insert(
        "timings".to_string(),
        serde_json::json!({
            "classification_ms": classification_ms,
            "processing_ms": processing_ms,
        }),
    );
}

/// How streamed workflow handling begins.
enum WorkflowStart {
    /// Extraction and compilation succeeded; drive the chunk stream.
    Streaming {
        pattern: Pattern,
        workflow_id: WorkflowId,
        node_count: usize,
        chunks: BoxStream<'static, trident_workflow::WorkflowChunk>,
    },
    /// Extraction failed; the prompt handler already produced this.
    Downgraded(Response),
    /// Compilation failed.
    Failed(Response),
}

fn workflow_response(
    final_state: WorkflowState,
    workflow_id: WorkflowId,
    path: Vec<String>,
    node_count: usize,
    pattern: Pattern,
) -> Response {
    let mut response = Response::ok(InputKind::Workflow, final_state.output.clone());
    response.tools_used = tool_names(&final_state);
    response
        .metadata
        .insert("workflow_id".to_string(), workflow_id.to_string().into());
    response.metadata.insert(
        "execution_path".to_string(),
        serde_json::to_value(&path).unwrap_or_default(),
    );
    response
        .metadata
        .insert("node_count".to_string(), node_count.into());
    response
        .metadata
        .insert("pattern".to_string(), pattern.name().into());
    response
}

fn command_response(outcome: CommandOutcome) -> Response {
    let mut response = Response::ok(InputKind::Command, outcome.content);
    response
        .metadata
        .insert("command".to_string(), outcome.command_name.into());
    response.metadata.extend(outcome.metadata);
    response
}

fn builtin_classification() -> ClassificationResult {
    ClassificationResult::new(InputKind::Command, 1.0, ClassificationMethod::Rule)
        .with_reasoning("built-in state command")
}

fn response_error(response: &Response) -> AgentError {
    let code = response
        .metadata
        .get("error_code")
        .and_then(|v| v.as_str())
        .unwrap_or("HANDLER_FAILED")
        .to_string();
    let category = response
        .metadata
        .get("error_category")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or(keel::ErrorCategory::System);
    AgentError::new(code, response.content.clone(), category)
        .with_context(serde_json::json!({ "metadata": response.metadata }))
}

fn tool_names(state: &WorkflowState) -> Vec<String> {
    let mut names: Vec<String> = vec![];
    for result in &state.tool_results {
        if !names.contains(&result.tool_name) {
            names.push(result.tool_name.clone());
        }
    }
    names
}
