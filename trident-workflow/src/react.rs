//! ReAct runner: think → act → observe → decide, bounded by the step
//! budget.

use std::sync::Arc;

use async_stream::try_stream;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use keel::{AgentError, StatePatch, ToolCall, ToolGateway, WorkflowSpec, WorkflowState};

use crate::compile::nodes;
use crate::engine::{NodeEvent, WorkflowEngine};

const THINK_SYSTEM_PROMPT: &str = "\
You are the reasoning core of a coding agent running a \
reason-act-observe loop. Given the task and the step history, reply \
with only a JSON object: {\"thought\": \"...\", \"action\": \
\"<tool-name>\" or \"final\", \"input\": { ... tool input ... }, \
\"answer\": \"final answer when action is final\"}";

/// One recorded loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactStep {
    /// The model's reasoning for this step.
    pub thought: String,
    /// Chosen action: a tool name or `final`.
    pub action: String,
    /// Tool input, when a tool was chosen.
    pub input: serde_json::Value,
    /// What came back from the action.
    pub observation: String,
}

#[derive(Debug, Deserialize)]
struct ThinkReply {
    #[serde(default)]
    thought: String,
    #[serde(default)]
    action: String,
    #[serde(default)]
    input: serde_json::Value,
    #[serde(default)]
    answer: Option<String>,
}

fn parse_think(content: &str) -> ThinkReply {
    let parsed = serde_json::from_str(content).ok().or_else(|| {
        let start = content.find('{')?;
        let end = content.rfind('}')?;
        serde_json::from_str(&content[start..=end]).ok()
    });
    // An unparseable reply is treated as a direct final answer.
    parsed.unwrap_or_else(|| ThinkReply {
        thought: String::new(),
        action: "final".to_string(),
        input: serde_json::Value::Null,
        answer: Some(content.to_string()),
    })
}

fn steps_patch(steps: &[ReactStep], description: String) -> StatePatch {
    let mut patch = StatePatch::step(description);
    patch.context.insert(
        "react_steps".to_string(),
        serde_json::to_value(steps).unwrap_or_default(),
    );
    patch
}

/// Run the ReAct loop, yielding one event per node visit.
pub(crate) fn run(
    engine: Arc<WorkflowEngine>,
    spec: WorkflowSpec,
    state: WorkflowState,
    cancel: CancellationToken,
) -> BoxStream<'static, Result<NodeEvent, AgentError>> {
    Box::pin(try_stream! {
        let mut state = state;
        let max_steps = spec
            .params
            .get("max_steps")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(engine.config().max_steps);

        let mut patch = StatePatch::step("processed input");
        patch.stage = Some("react".to_string());
        state.apply(patch);
        yield NodeEvent::new(nodes::PROCESS_INPUT, &state);

        let tool_names = engine.gateway().tool_names().await;
        let mut steps: Vec<ReactStep> = vec![];
        let mut final_answer: Option<String> = None;

        for step_number in 1..=max_steps {
            crate::engine::ensure_live(&cancel, "react loop")?;

            // think
            let history: String = steps
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    format!(
                        "step {}: thought={} action={} observation={}\n",
                        i + 1,
                        s.thought,
                        s.action,
                        s.observation
                    )
                })
                .collect();
            let user = format!(
                "Task: {}\nAvailable tools: {}\nHistory:\n{history}",
                state.input,
                tool_names.join(", "),
            );
            let reply = parse_think(&engine.model_call(THINK_SYSTEM_PROMPT, &user, &cancel).await?);
            let mut current = ReactStep {
                thought: reply.thought.clone(),
                action: reply.action.clone(),
                input: reply.input.clone(),
                observation: String::new(),
            };
            let mut patch = steps_patch(&steps, format!("thought: {}", reply.thought));
            patch.reasoning = Some(if state.reasoning.is_empty() {
                reply.thought.clone()
            } else {
                format!("{}\n{}", state.reasoning, reply.thought)
            });
            state.apply(patch);
            yield NodeEvent::new(nodes::THINK, &state);

            // act
            if reply.action == "final" || reply.action.is_empty() {
                current.observation = "final answer ready".to_string();
                final_answer = Some(reply.answer.unwrap_or_else(|| reply.thought.clone()));
                state.apply(steps_patch(&steps, "act: no tool needed".to_string()));
                yield NodeEvent::new(nodes::ACT, &state);
            } else {
                let call = ToolCall::new(
                    reply.action.clone(),
                    if reply.input.is_null() {
                        serde_json::json!({})
                    } else {
                        reply.input.clone()
                    },
                    engine.tool_context(&state, &cancel),
                );
                let mut patch = steps_patch(&steps, format!("act: {}", reply.action));
                match engine.gateway().run_tool(call).await {
                    Ok(result) => {
                        current.observation = result
                            .output
                            .as_ref()
                            .map(|o| o.to_string())
                            .or_else(|| result.error.clone())
                            .unwrap_or_default();
                        patch.tool_results.push(result);
                    }
                    Err(e) => {
                        debug!(action = %reply.action, error = %e, "react action failed");
                        current.observation = format!("error: {}", e.message);
                    }
                }
                state.apply(patch);
                yield NodeEvent::new(nodes::ACT, &state);
            }

            // observe
            steps.push(current);
            state.apply(steps_patch(
                &steps,
                format!("observation: {}", truncate(&steps.last().expect("just pushed").observation, 120)),
            ));
            yield NodeEvent::new(nodes::OBSERVE, &state);

            // decide
            let done = final_answer.is_some() || step_number == max_steps;
            let mut patch = steps_patch(
                &steps,
                if done { "decide: complete" } else { "decide: continue" }.to_string(),
            );
            if done {
                let answer = final_answer.clone().unwrap_or_else(|| {
                    format!("Step budget exhausted after {max_steps} steps.\n{}", state.reasoning)
                });
                patch.context.insert("draft".to_string(), answer.into());
            }
            state.apply(patch);
            yield NodeEvent::new(nodes::DECIDE, &state);
            if done {
                break;
            }
        }

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

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let prefix: String = text.chars().take(max).collect();
        format!("{prefix}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_think_reads_tool_action() {
        let reply = parse_think(
            r#"{"thought": "need the file", "action": "read_file", "input": {"path": "a.rs"}}"#,
        );
        assert_eq!(reply.action, "read_file");
        assert_eq!(reply.input["path"], "a.rs");
    }

    #[test]
    fn parse_think_treats_prose_as_final_answer() {
        let reply = parse_think("The answer is 42.");
        assert_eq!(reply.action, "final");
        assert_eq!(reply.answer.as_deref(), Some("The answer is 42."));
    }

    #[test]
    fn truncate_preserves_short_text() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("0123456789abc", 10), "0123456789…");
    }
}
