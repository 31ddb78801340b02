//! Single-call execution and the batch sequencer.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::debug;

use keel::{codes, AgentError, DurationMs, Tool, ToolCall, ToolMetrics, ToolResult};
use trident_tool::ToolRegistry;

/// Executor configuration.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Per-call timeout when the caller does not override it.
    pub default_timeout: DurationMs,
    /// How many concurrency-safe calls a batch runs in parallel.
    pub max_concurrent_tools: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: DurationMs::from_secs(30),
            max_concurrent_tools: 5,
        }
    }
}

/// Per-call options.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    /// Override the configured timeout for this call.
    pub timeout: Option<DurationMs>,
}

/// Validates, authorises, times, and runs tool calls against the
/// registry.
///
/// Failure split: infrastructure failures (unknown tool, schema
/// mismatch, permission denial, timeout, cancellation) surface as
/// `Err(AgentError)`; a tool that runs and returns its own error
/// produces `Ok(ToolResult { success: false, .. })`. Callers that need
/// error evidence (ReWOO) get a result either way.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    config: ExecutorConfig,
}

impl ToolExecutor {
    /// An executor over the given registry.
    pub fn new(registry: Arc<ToolRegistry>, config: ExecutorConfig) -> Self {
        Self { registry, config }
    }

    /// Execute one call: validate input against the tool's schema,
    /// check permissions, then run under the timeout while observing
    /// the call's cancellation token.
    pub async fn execute(
        &self,
        call: ToolCall,
        opts: ExecuteOptions,
    ) -> Result<ToolResult, AgentError> {
        run_one(
            Arc::clone(&self.registry),
            self.config.default_timeout,
            call,
            opts,
        )
        .await
    }

    /// Execute a batch.
    ///
    /// Calls whose tools are concurrency-safe launch in parallel,
    /// bounded by `max_concurrent_tools`; the rest run sequentially in
    /// caller order. The batch fails fast on the first infrastructure
    /// error; results completed so far travel in the error context
    /// under `partial_results`.
    pub async fn execute_batch(&self, calls: Vec<ToolCall>) -> Result<Vec<ToolResult>, AgentError> {
        let names: Vec<String> = calls.iter().map(|c| c.tool_name.clone()).collect();
        let (safe, _) = self.registry.partition_by_concurrency(&names).await;

        let mut parallel = Vec::new();
        let mut sequential = Vec::new();
        for call in calls {
            if safe.contains(&call.tool_name) {
                parallel.push(call);
            } else {
                sequential.push(call);
            }
        }
        debug!(
            parallel = parallel.len(),
            sequential = sequential.len(),
            "executing tool batch"
        );

        let mut results = Vec::new();
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.max_concurrent_tools));
        let mut join_set = JoinSet::new();
        for call in parallel {
            let registry = Arc::clone(&self.registry);
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.config.default_timeout;
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                run_one(registry, timeout, call, ExecuteOptions::default()).await
            });
        }
        while let Some(joined) = join_set.join_next().await {
            let result = joined.map_err(|e| {
                AgentError::system("JOIN_FAILED", format!("batch task failed: {e}"))
            })?;
            match result {
                Ok(tool_result) => results.push(tool_result),
                Err(e) => {
                    join_set.abort_all();
                    return Err(with_partial_results(e, &results));
                }
            }
        }

        for call in sequential {
            match self.execute(call, ExecuteOptions::default()).await {
                Ok(tool_result) => results.push(tool_result),
                Err(e) => return Err(with_partial_results(e, &results)),
            }
        }
        Ok(results)
    }
}

fn with_partial_results(error: AgentError, results: &[ToolResult]) -> AgentError {
    let partial = serde_json::to_value(results).unwrap_or_default();
    let context = serde_json::json!({
        "partial_results": partial,
        "completed": results.len(),
        "cause": error.context,
    });
    error.with_context(context)
}

async fn run_one(
    registry: Arc<ToolRegistry>,
    default_timeout: DurationMs,
    call: ToolCall,
    opts: ExecuteOptions,
) -> Result<ToolResult, AgentError> {
    let tool = registry.get(&call.tool_name).await.ok_or_else(|| {
        AgentError::configuration(
            codes::TOOL_NOT_FOUND,
            format!("tool not registered: {}", call.tool_name),
        )
    })?;

    // (a) schema validation
    let schema = tool.input_schema();
    let validator = jsonschema::validator_for(&schema).map_err(|e| {
        AgentError::configuration(
            "INVALID_SCHEMA",
            format!("tool {} has an invalid input schema: {e}", call.tool_name),
        )
    })?;
    if validator.validate(&call.input).is_err() {
        let detail: Vec<String> = validator
            .iter_errors(&call.input)
            .take(3)
            .map(|e| format!("{e} at {}", e.instance_path))
            .collect();
        return Err(AgentError::validation(
            codes::VALIDATION,
            format!("input for {} failed validation", call.tool_name),
        )
        .with_context(serde_json::json!({ "errors": detail })));
    }

    // (b) permissions
    if let Err(deny) = tool.check_permissions(&call.context, &call.input).await {
        return Err(AgentError::business(
            codes::UNAUTHORIZED,
            format!("{} denied: {}", call.tool_name, deny.message),
        ));
    }

    // (c) run under timeout, observing cancellation
    let timeout = opts.timeout.unwrap_or(default_timeout);
    let started_at = Utc::now();
    let execution = tool.execute(call.context.clone(), call.input.clone());
    let outcome = tokio::select! {
        _ = call.context.cancellation.cancelled() => {
            return Err(AgentError::cancelled(&call.tool_name));
        }
        outcome = tokio::time::timeout(timeout.to_std(), execution) => outcome,
    };
    let metrics = ToolMetrics {
        started_at,
        ended_at: Utc::now(),
    };

    // (d) record success/failure
    match outcome {
        Err(_elapsed) => Err(AgentError::timeout(&call.tool_name, timeout)),
        Ok(Ok(output)) => Ok(ToolResult::ok(&call, output, metrics)),
        Ok(Err(e)) => Ok(ToolResult::failed(&call, e.to_string(), metrics)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel::test_utils::{EchoTool, FailTool, SleepTool};
    use keel::{SessionId, ToolContext};
    use trident_tool::{RegisterOptions, ToolMetadata};

    async fn registry_with(tools: Vec<Arc<dyn keel::Tool>>) -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new());
        for tool in tools {
            registry
                .register(tool, ToolMetadata::default(), RegisterOptions::default())
                .await
                .unwrap();
        }
        registry
    }

    fn call(tool: &str) -> ToolCall {
        ToolCall::new(
            tool,
            serde_json::json!({}),
            ToolContext::for_session(SessionId::new("s-1")),
        )
    }

    #[tokio::test]
    async fn executes_and_records_metrics() {
        let registry = registry_with(vec![Arc::new(EchoTool)]).await;
        let exec = ToolExecutor::new(registry, ExecutorConfig::default());
        let result = exec.execute(call("echo"), ExecuteOptions::default()).await.unwrap();
        assert!(result.success);
        assert!(result.metrics.ended_at >= result.metrics.started_at);
    }

    #[tokio::test]
    async fn tool_failure_becomes_failed_result() {
        let registry = registry_with(vec![Arc::new(FailTool)]).await;
        let exec = ToolExecutor::new(registry, ExecutorConfig::default());
        let result = exec.execute(call("fail"), ExecuteOptions::default()).await.unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("always fails"));
    }

    #[tokio::test]
    async fn unknown_tool_is_configuration_error() {
        let registry = registry_with(vec![]).await;
        let exec = ToolExecutor::new(registry, ExecutorConfig::default());
        let err = exec
            .execute(call("ghost"), ExecuteOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::TOOL_NOT_FOUND);
    }

    struct StrictTool;

    impl keel::Tool for StrictTool {
        fn name(&self) -> &str {
            "strict"
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn description(&self) -> &str {
            "Requires a path property"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"],
            })
        }
        fn is_read_only(&self) -> bool {
            true
        }
        fn is_concurrency_safe(&self) -> bool {
            true
        }
        fn execute(
            &self,
            _ctx: ToolContext,
            input: serde_json::Value,
        ) -> keel::ToolFuture<'_, serde_json::Value> {
            Box::pin(async move { Ok(input) })
        }
        fn check_permissions<'a>(
            &'a self,
            ctx: &'a ToolContext,
            _input: &'a serde_json::Value,
        ) -> keel::ToolFuture<'a, ()> {
            Box::pin(async move {
                if ctx.session_id.as_str() == "denied" {
                    Err(AgentError::business("DENY", "session is denied"))
                } else {
                    Ok(())
                }
            })
        }
    }

    #[tokio::test]
    async fn schema_mismatch_is_validation_error() {
        let registry = registry_with(vec![Arc::new(StrictTool)]).await;
        let exec = ToolExecutor::new(registry, ExecutorConfig::default());
        let err = exec
            .execute(call("strict"), ExecuteOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::VALIDATION);
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn permission_denial_is_unauthorized() {
        let registry = registry_with(vec![Arc::new(StrictTool)]).await;
        let exec = ToolExecutor::new(registry, ExecutorConfig::default());
        let mut call = ToolCall::new(
            "strict",
            serde_json::json!({"path": "a.txt"}),
            ToolContext::for_session(SessionId::new("denied")),
        );
        call.timestamp = Utc::now();
        let err = exec.execute(call, ExecuteOptions::default()).await.unwrap_err();
        assert_eq!(err.code, codes::UNAUTHORIZED);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_distinct_error() {
        let registry = registry_with(vec![Arc::new(SleepTool {
            millis: 5000,
            concurrency_safe: true,
        })])
        .await;
        let exec = ToolExecutor::new(registry, ExecutorConfig::default());
        let err = exec
            .execute(
                call("sleep"),
                ExecuteOptions {
                    timeout: Some(DurationMs::from_millis(50)),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.exit_code(), 4);
    }

    #[tokio::test]
    async fn cancellation_surfaces_as_cancelled() {
        let registry = registry_with(vec![Arc::new(SleepTool {
            millis: 60_000,
            concurrency_safe: true,
        })])
        .await;
        let exec = ToolExecutor::new(registry, ExecutorConfig::default());
        let call = call("sleep");
        let token = call.context.cancellation.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            token.cancel();
        });
        let err = exec.execute(call, ExecuteOptions::default()).await.unwrap_err();
        assert!(err.is_cancelled());
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unsafe_tools_serialise_in_batch() {
        let registry = registry_with(vec![Arc::new(SleepTool {
            millis: 50,
            concurrency_safe: false,
        })])
        .await;
        let exec = ToolExecutor::new(registry, ExecutorConfig::default());
        let start = tokio::time::Instant::now();
        let results = exec
            .execute_batch(vec![call("sleep"), call("sleep"), call("sleep")])
            .await
            .unwrap();
        let elapsed = start.elapsed();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.success));
        // Serial execution: three 50ms sleeps cannot finish under 150ms.
        assert!(elapsed >= std::time::Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn safe_tools_parallelise_in_batch() {
        let registry = registry_with(vec![Arc::new(SleepTool {
            millis: 50,
            concurrency_safe: true,
        })])
        .await;
        let exec = ToolExecutor::new(registry, ExecutorConfig::default());
        let start = tokio::time::Instant::now();
        let results = exec
            .execute_batch(vec![call("sleep"), call("sleep"), call("sleep")])
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(start.elapsed() < std::time::Duration::from_millis(150));
    }

    #[tokio::test]
    async fn batch_fails_fast_with_partial_results() {
        let registry = registry_with(vec![Arc::new(EchoTool)]).await;
        let exec = ToolExecutor::new(registry, ExecutorConfig::default());
        // echo succeeds (parallel), ghost is unknown (sequential) and
        // fails the batch after the parallel wave completes.
        let err = exec
            .execute_batch(vec![call("echo"), call("ghost")])
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::TOOL_NOT_FOUND);
        assert_eq!(err.context["completed"], 1);
    }
}
