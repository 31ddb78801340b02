//! ReWOO runner: plan once, work the steps in dependency waves, solve
//! from the evidence.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_stream::try_stream;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use keel::{AgentError, StatePatch, ToolCall, ToolGateway, ToolResult, WorkflowSpec, WorkflowState};

use crate::compile::nodes;
use crate::engine::{NodeEvent, WorkflowEngine};

const PLANNER_SYSTEM_PROMPT: &str = "\
You are the planner of a plan-work-solve agent. Break the task into \
tool steps. Reply with only a JSON object: {\"steps\": [{\"id\": \
\"s1\", \"action\": \"<tool-name>\", \"input\": {...}, \"description\": \
\"...\", \"dependencies\": [\"id\", ...]}]}. Step inputs may reference \
earlier evidence with the placeholder [<step-id>].";

/// One planned step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Unique step id.
    pub id: String,
    /// Tool to invoke.
    pub action: String,
    /// Tool input; string values may carry `[step-id]` placeholders.
    #[serde(default)]
    pub input: serde_json::Value,
    /// What the step is for.
    #[serde(default)]
    pub description: String,
    /// Steps that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// The recorded outcome of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    /// The step this evidence belongs to.
    pub step_id: String,
    /// The tool that ran.
    pub tool: String,
    /// Whether the step succeeded.
    pub success: bool,
    /// Output text on success, error text on failure.
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct PlanReply {
    steps: Vec<PlanStep>,
}

/// Validate a plan: unique ids, known dependencies, no cycles.
pub(crate) fn validate_plan(steps: &[PlanStep]) -> Result<(), AgentError> {
    let mut ids = HashSet::new();
    for step in steps {
        if !ids.insert(step.id.as_str()) {
            return Err(AgentError::validation(
                "DUPLICATE_STEP",
                format!("duplicate plan step id: {}", step.id),
            ));
        }
    }
    for step in steps {
        for dep in &step.dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(AgentError::validation(
                    "UNKNOWN_DEPENDENCY",
                    format!("step {} depends on unknown step {dep}", step.id),
                ));
            }
        }
    }
    // Kahn's algorithm: if not every step drains, the deps cycle.
    let mut remaining: HashMap<&str, usize> = steps
        .iter()
        .map(|s| (s.id.as_str(), s.dependencies.len()))
        .collect();
    let mut drained = 0;
    loop {
        let ready: Vec<&str> = remaining
            .iter()
            .filter(|(_, deps)| **deps == 0)
            .map(|(id, _)| *id)
            .collect();
        if ready.is_empty() {
            break;
        }
        for id in ready {
            remaining.remove(id);
            drained += 1;
            for step in steps {
                if step.dependencies.iter().any(|d| d == id) {
                    if let Some(deps) = remaining.get_mut(step.id.as_str()) {
                        *deps -= 1;
                    }
                }
            }
        }
    }
    if drained != steps.len() {
        return Err(AgentError::validation(
            "CYCLIC_PLAN",
            "plan dependencies form a cycle",
        ));
    }
    Ok(())
}

/// Replace `[step-id]` placeholders in string values with evidence
/// content; failed dependencies substitute as `[Error:step-id]`.
pub(crate) fn substitute(
    input: &serde_json::Value,
    evidence: &HashMap<String, Evidence>,
) -> serde_json::Value {
    match input {
        serde_json::Value::String(text) => {
            let mut result = text.clone();
            for (id, item) in evidence {
                let placeholder = format!("[{id}]");
                if result.contains(&placeholder) {
                    let replacement = if item.success {
                        item.content.clone()
                    } else {
                        format!("[Error:{id}]")
                    };
                    result = result.replace(&placeholder, &replacement);
                }
            }
            serde_json::Value::String(result)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| substitute(v, evidence)).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, evidence)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn evidence_patch(evidence: &[Evidence], description: String) -> StatePatch {
    let mut patch = StatePatch::step(description);
    patch.context.insert(
        "evidence".to_string(),
        serde_json::to_value(evidence).unwrap_or_default(),
    );
    patch
}

fn parse_plan(content: &str) -> Option<Vec<PlanStep>> {
    let reply: PlanReply = serde_json::from_str(content).ok().or_else(|| {
        let start = content.find('{')?;
        let end = content.rfind('}')?;
        serde_json::from_str(&content[start..=end]).ok()
    })?;
    Some(reply.steps)
}

/// Run plan → work → solve, yielding one event per phase node.
pub(crate) fn run(
    engine: Arc<WorkflowEngine>,
    spec: WorkflowSpec,
    state: WorkflowState,
    cancel: CancellationToken,
) -> BoxStream<'static, Result<NodeEvent, AgentError>> {
    Box::pin(try_stream! {
        let mut state = state;
        let mut patch = StatePatch::step("processed input");
        patch.stage = Some("rewoo".to_string());
        state.apply(patch);
        yield NodeEvent::new(nodes::PROCESS_INPUT, &state);

        // planner: the spec's required tools narrow the menu when set
        let tool_names = if spec.required_tools.is_empty() {
            engine.gateway().tool_names().await
        } else {
            spec.required_tools.clone()
        };
        let user = format!(
            "Task: {}\nAvailable tools: {}",
            state.input,
            tool_names.join(", ")
        );
        let content = engine.model_call(PLANNER_SYSTEM_PROMPT, &user, &cancel).await?;
        let steps = parse_plan(&content).ok_or_else(|| {
            AgentError::system("PLAN_PARSE", "planner reply was not a valid plan")
        })?;
        validate_plan(&steps)?;
        let mut patch = StatePatch::step(format!("planned {} steps", steps.len()));
        patch.stage = Some("plan".to_string());
        patch.context.insert(
            "plan".to_string(),
            serde_json::to_value(&steps).unwrap_or_default(),
        );
        state.apply(patch);
        yield NodeEvent::new(nodes::PLANNER, &state);

        // worker: execute ready steps in waves
        let mut evidence_by_id: HashMap<String, Evidence> = HashMap::new();
        let mut evidence_log: Vec<Evidence> = vec![];
        let mut tool_results: Vec<ToolResult> = vec![];
        let mut pending: Vec<PlanStep> = steps;
        while !pending.is_empty() {
            crate::engine::ensure_live(&cancel, "rewoo worker")?;
            let (wave, rest): (Vec<PlanStep>, Vec<PlanStep>) = pending
                .into_iter()
                .partition(|s| s.dependencies.iter().all(|d| evidence_by_id.contains_key(d)));
            pending = rest;
            // validate_plan guarantees every round has a ready step.
            if wave.is_empty() {
                break;
            }

            let wave_outcomes =
                run_wave(&engine, &state, &cancel, &wave, &evidence_by_id).await;
            for (step, outcome) in wave.iter().zip(wave_outcomes) {
                let item = match outcome {
                    Ok(result) => {
                        let content = result
                            .output
                            .as_ref()
                            .map(|o| o.to_string())
                            .or_else(|| result.error.clone())
                            .unwrap_or_default();
                        let success = result.success;
                        tool_results.push(result);
                        Evidence {
                            step_id: step.id.clone(),
                            tool: step.action.clone(),
                            success,
                            content,
                        }
                    }
                    Err(e) => {
                        debug!(step = %step.id, error = %e, "plan step failed");
                        Evidence {
                            step_id: step.id.clone(),
                            tool: step.action.clone(),
                            success: false,
                            content: e.message.clone(),
                        }
                    }
                };
                evidence_by_id.insert(step.id.clone(), item.clone());
                evidence_log.push(item);
            }
        }
        let mut patch = evidence_patch(
            &evidence_log,
            format!("collected {} evidence entries", evidence_log.len()),
        );
        patch.stage = Some("work".to_string());
        patch.tool_results = tool_results;
        state.apply(patch);
        yield NodeEvent::new(nodes::WORKER, &state);

        // solver
        let evidence_text: String = evidence_log
            .iter()
            .map(|e| {
                format!(
                    "[{}] {} ({}): {}\n",
                    e.step_id,
                    e.tool,
                    if e.success { "ok" } else { "failed" },
                    e.content
                )
            })
            .collect();
        let user = format!("Task: {}\nEvidence:\n{evidence_text}", state.input);
        let answer = engine
            .model_call("Solve the task from the collected evidence.", &user, &cancel)
            .await?;
        let mut patch = StatePatch::step("solved from evidence");
        patch.stage = Some("solve".to_string());
        patch.reasoning = Some(evidence_text);
        patch.context.insert("draft".to_string(), answer.into());
        state.apply(patch);
        yield NodeEvent::new(nodes::SOLVER, &state);

        let output = state
            .context
            .get("draft")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let mut patch = StatePatch::output(output);
        patch.stage = Some("complete".to_string());
        state.apply(patch);
        yield NodeEvent::new(nodes::FORMAT_OUTPUT, &state);
    })
}

/// Run one wave. Tries the batch path first (which parallelises
/// concurrency-safe calls); if the batch fails on infrastructure, the
/// wave reruns sequentially so each step can record error evidence.
async fn run_wave(
    engine: &Arc<WorkflowEngine>,
    state: &WorkflowState,
    cancel: &CancellationToken,
    wave: &[PlanStep],
    evidence: &HashMap<String, Evidence>,
) -> Vec<Result<ToolResult, AgentError>> {
    let build_call = |step: &PlanStep| {
        ToolCall::new(
            step.action.clone(),
            substitute(&step.input, evidence),
            engine.tool_context(state, cancel),
        )
    };

    let calls: Vec<ToolCall> = wave.iter().map(build_call).collect();
    let call_ids: Vec<keel::CallId> = calls.iter().map(|c| c.call_id.clone()).collect();
    match engine.gateway().run_batch(calls).await {
        Ok(results) => {
            // Batch results arrive in completion order; re-associate
            // with the wave by call id.
            let mut by_id: HashMap<keel::CallId, ToolResult> = results
                .into_iter()
                .map(|r| (r.call_id.clone(), r))
                .collect();
            call_ids
                .into_iter()
                .map(|id| {
                    by_id.remove(&id).ok_or_else(|| {
                        AgentError::system("MISSING_RESULT", "batch lost a result")
                    })
                })
                .collect()
        }
        Err(batch_error) => {
            debug!(error = %batch_error, "wave batch failed; recovering per step");
            // The batch error carries the results that completed before
            // the failure; reuse them and run only the missing steps,
            // one at a time, so each can record its own evidence.
            let mut by_id: HashMap<keel::CallId, ToolResult> = batch_error
                .context
                .get("partial_results")
                .and_then(|v| serde_json::from_value::<Vec<ToolResult>>(v.clone()).ok())
                .unwrap_or_default()
                .into_iter()
                .map(|r| (r.call_id.clone(), r))
                .collect();
            let mut outcomes = Vec::with_capacity(wave.len());
            for (step, call_id) in wave.iter().zip(call_ids) {
                match by_id.remove(&call_id) {
                    Some(result) => outcomes.push(Ok(result)),
                    None => outcomes.push(engine.gateway().run_tool(build_call(step)).await),
                }
            }
            outcomes
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, deps: &[&str]) -> PlanStep {
        PlanStep {
            id: id.to_string(),
            action: "grep".to_string(),
            input: serde_json::json!({"q": "x"}),
            description: String::new(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn valid_plan_passes() {
        validate_plan(&[step("a", &[]), step("b", &["a"]), step("c", &["a", "b"])]).unwrap();
    }

    #[test]
    fn duplicate_ids_rejected() {
        let err = validate_plan(&[step("a", &[]), step("a", &[])]).unwrap_err();
        assert_eq!(err.code, "DUPLICATE_STEP");
    }

    #[test]
    fn unknown_dependency_rejected() {
        let err = validate_plan(&[step("a", &["ghost"])]).unwrap_err();
        assert_eq!(err.code, "UNKNOWN_DEPENDENCY");
    }

    #[test]
    fn dependency_cycle_rejected() {
        let err = validate_plan(&[step("a", &["b"]), step("b", &["a"])]).unwrap_err();
        assert_eq!(err.code, "CYCLIC_PLAN");
    }

    #[test]
    fn substitution_inserts_evidence_and_error_markers() {
        let mut evidence = HashMap::new();
        evidence.insert(
            "s1".to_string(),
            Evidence {
                step_id: "s1".into(),
                tool: "grep".into(),
                success: true,
                content: "three matches".into(),
            },
        );
        evidence.insert(
            "s2".to_string(),
            Evidence {
                step_id: "s2".into(),
                tool: "read".into(),
                success: false,
                content: "no such file".into(),
            },
        );
        let input = serde_json::json!({
            "summary": "found: [s1]",
            "context": "prior: [s2]",
        });
        let out = substitute(&input, &evidence);
        assert_eq!(out["summary"], "found: three matches");
        assert_eq!(out["context"], "prior: [Error:s2]");
    }

    #[test]
    fn plan_parses_from_wrapped_json() {
        let steps = parse_plan(
            r#"Here: {"steps": [{"id": "s1", "action": "grep", "input": {}, "dependencies": []}]}"#,
        )
        .unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].id, "s1");
    }
}
