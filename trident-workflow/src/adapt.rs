//! ADaPT runner: as-needed recursive decomposition.
//!
//! Tasks live in an arena map keyed by task id, with parent/children
//! links as ids rather than owning pointers. Traversal is an explicit
//! worklist, so recursion depth never touches the call stack; the
//! arena is dropped wholesale when the workflow ends.

use std::collections::HashMap;
use std::sync::Arc;

use async_stream::try_stream;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use keel::{AgentError, StatePatch, WorkflowSpec, WorkflowState};

use crate::compile::nodes;
use crate::engine::{NodeEvent, WorkflowEngine};

/// How hard a task looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskComplexity {
    /// Executable directly.
    Simple,
    /// Executable directly, with more room for error.
    Medium,
    /// Needs decomposition.
    Complex,
}

/// Task lifecycle. Transitions are strict:
/// `pending → executing | decomposed`, `executing → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Not yet processed.
    Pending,
    /// Currently executing.
    Executing,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed,
    /// Split into children.
    Decomposed,
}

/// How a task's outcome binds to its siblings under the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    /// Parent needs every child to succeed.
    And,
    /// Parent succeeds on the first successful child.
    Or,
}

/// One node in the decomposition arena.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptTask {
    /// Arena key.
    pub id: String,
    /// What to do.
    pub description: String,
    /// Assessed complexity.
    pub complexity: TaskComplexity,
    /// Lifecycle state.
    pub status: TaskStatus,
    /// Sibling combination rule.
    pub logical_operator: LogicalOperator,
    /// Depth in the decomposition tree (root = 0).
    pub decomposition_level: u32,
    /// Parent task id, if any.
    pub parent: Option<String>,
    /// Child task ids in creation order.
    pub children: Vec<String>,
    /// Result text once completed or failed.
    pub result: Option<String>,
}

impl AdaptTask {
    fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        complexity: TaskComplexity,
        operator: LogicalOperator,
        level: u32,
        parent: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            complexity,
            status: TaskStatus::Pending,
            logical_operator: operator,
            decomposition_level: level,
            parent,
            children: vec![],
            result: None,
        }
    }

    /// Enforce the strict transition table.
    pub fn transition(&mut self, to: TaskStatus) -> Result<(), AgentError> {
        let allowed = matches!(
            (self.status, to),
            (TaskStatus::Pending, TaskStatus::Executing)
                | (TaskStatus::Pending, TaskStatus::Decomposed)
                | (TaskStatus::Executing, TaskStatus::Completed)
                | (TaskStatus::Executing, TaskStatus::Failed)
        );
        if !allowed {
            return Err(AgentError::system(
                "INVALID_TRANSITION",
                format!("task {}: {:?} -> {to:?} is not allowed", self.id, self.status),
            ));
        }
        self.status = to;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct AssessReply {
    complexity: String,
}

#[derive(Debug, Deserialize)]
struct DecomposeReply {
    #[serde(default)]
    operator: Option<String>,
    subtasks: Vec<SubtaskReply>,
}

#[derive(Debug, Deserialize)]
struct SubtaskReply {
    description: String,
    #[serde(default)]
    complexity: Option<String>,
}

fn parse_json_object<T: serde::de::DeserializeOwned>(content: &str) -> Option<T> {
    serde_json::from_str(content).ok().or_else(|| {
        let start = content.find('{')?;
        let end = content.rfind('}')?;
        serde_json::from_str(&content[start..=end]).ok()
    })
}

fn parse_complexity(raw: &str) -> Option<TaskComplexity> {
    match raw {
        "simple" => Some(TaskComplexity::Simple),
        "medium" => Some(TaskComplexity::Medium),
        "complex" => Some(TaskComplexity::Complex),
        _ => None,
    }
}

/// Word-count and conjunction heuristic, used when the model gives no
/// usable assessment.
pub(crate) fn heuristic_complexity(description: &str) -> TaskComplexity {
    let words = description.split_whitespace().count();
    let conjoined = description.contains(" and ") || description.contains(" then ");
    if conjoined && words > 8 {
        TaskComplexity::Complex
    } else if words > 12 {
        TaskComplexity::Medium
    } else {
        TaskComplexity::Simple
    }
}

/// Fallback decomposition: split on connective words.
fn heuristic_subtasks(description: &str) -> Vec<String> {
    let mut parts: Vec<String> = description
        .split(" and ")
        .flat_map(|p| p.split(" then "))
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 2 {
        parts = vec![description.to_string()];
    }
    parts
}

fn arena_patch(arena: &HashMap<String, AdaptTask>, description: String) -> StatePatch {
    let mut patch = StatePatch::step(description);
    patch.context.insert(
        "task_arena".to_string(),
        serde_json::to_value(arena).unwrap_or_default(),
    );
    patch
}

/// Combine child outcomes bottom-up from the root. Returns
/// `(status, result)` for the given task.
pub(crate) fn combine(
    arena: &HashMap<String, AdaptTask>,
    task_id: &str,
) -> (TaskStatus, String) {
    let Some(task) = arena.get(task_id) else {
        return (TaskStatus::Failed, format!("missing task {task_id}"));
    };
    if task.children.is_empty() {
        return (task.status, task.result.clone().unwrap_or_default());
    }
    let outcomes: Vec<(TaskStatus, String)> = task
        .children
        .iter()
        .map(|child| combine(arena, child))
        .collect();
    let operator = arena
        .get(task.children[0].as_str())
        .map(|c| c.logical_operator)
        .unwrap_or(LogicalOperator::And);
    match operator {
        LogicalOperator::And => {
            if let Some((_, failure)) = outcomes
                .iter()
                .find(|(status, _)| *status != TaskStatus::Completed)
            {
                (TaskStatus::Failed, format!("subtask failed: {failure}"))
            } else {
                let joined: Vec<String> =
                    outcomes.into_iter().map(|(_, result)| result).collect();
                (TaskStatus::Completed, joined.join("\n"))
            }
        }
        LogicalOperator::Or => outcomes
            .iter()
            .find(|(status, _)| *status == TaskStatus::Completed)
            .map(|(_, result)| (TaskStatus::Completed, result.clone()))
            .unwrap_or_else(|| {
                (
                    TaskStatus::Failed,
                    "no alternative subtask succeeded".to_string(),
                )
            }),
    }
}

/// Run recursive decomposition, yielding one event per node visit.
pub(crate) fn run(
    engine: Arc<WorkflowEngine>,
    spec: WorkflowSpec,
    state: WorkflowState,
    cancel: CancellationToken,
) -> BoxStream<'static, Result<NodeEvent, AgentError>> {
    Box::pin(try_stream! {
        let mut state = state;
        let max_level = spec
            .params
            .get("max_decomposition_level")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(engine.config().max_decomposition_level);

        let mut patch = StatePatch::step("processed input");
        patch.stage = Some("adapt".to_string());
        state.apply(patch);
        yield NodeEvent::new(nodes::PROCESS_INPUT, &state);

        let mut arena: HashMap<String, AdaptTask> = HashMap::new();
        let root_complexity = match spec
            .params
            .get("complexity")
            .and_then(|v| v.as_str())
            .and_then(parse_complexity)
        {
            Some(complexity) => complexity,
            None => assess(&engine, &state.input, &cancel).await,
        };
        let root = AdaptTask::new(
            "task-0",
            state.input.clone(),
            root_complexity,
            LogicalOperator::And,
            0,
            None,
        );
        arena.insert(root.id.clone(), root);
        let mut next_task_number: u32 = 1;
        let mut worklist = vec!["task-0".to_string()];

        while let Some(task_id) = worklist.pop() {
            crate::engine::ensure_live(&cancel, "adapt runner")?;
            let (description, complexity, level) = {
                let task = arena.get(&task_id).expect("worklist ids are in the arena");
                (task.description.clone(), task.complexity, task.decomposition_level)
            };
            state.apply(arena_patch(
                &arena,
                format!("assessed {task_id}: {complexity:?} at level {level}"),
            ));
            yield NodeEvent::new(nodes::ASSESS, &state);

            if complexity == TaskComplexity::Complex && level < max_level {
                // decompose
                let (operator, subtasks) =
                    decompose(&engine, &description, &cancel).await;
                let mut child_ids = vec![];
                for subtask in subtasks {
                    let child_id = format!("task-{next_task_number}");
                    next_task_number += 1;
                    let complexity = subtask
                        .complexity
                        .as_deref()
                        .and_then(parse_complexity)
                        .unwrap_or_else(|| heuristic_complexity(&subtask.description));
                    arena.insert(
                        child_id.clone(),
                        AdaptTask::new(
                            child_id.clone(),
                            subtask.description,
                            complexity,
                            operator,
                            level + 1,
                            Some(task_id.clone()),
                        ),
                    );
                    child_ids.push(child_id);
                }
                {
                    let task = arena.get_mut(&task_id).expect("task exists");
                    task.transition(TaskStatus::Decomposed)?;
                    task.children = child_ids.clone();
                }
                // Reverse keeps processing in creation order off the stack.
                worklist.extend(child_ids.into_iter().rev());
                state.apply(arena_patch(&arena, format!("decomposed {task_id}")));
                yield NodeEvent::new(nodes::DECOMPOSE, &state);
            } else {
                // execute
                {
                    let task = arena.get_mut(&task_id).expect("task exists");
                    task.transition(TaskStatus::Executing)?;
                }
                let outcome = engine
                    .model_call("Complete this subtask and report the result.", &description, &cancel)
                    .await;
                {
                    let task = arena.get_mut(&task_id).expect("task exists");
                    match outcome {
                        Ok(result) => {
                            task.transition(TaskStatus::Completed)?;
                            task.result = Some(result);
                        }
                        Err(e) => {
                            debug!(task = %task_id, error = %e, "subtask execution failed");
                            task.transition(TaskStatus::Failed)?;
                            task.result = Some(e.message.clone());
                        }
                    }
                }
                state.apply(arena_patch(&arena, format!("executed {task_id}")));
                yield NodeEvent::new(nodes::EXECUTE, &state);
            }
        }

        // combine bottom-up from the root
        let (root_status, root_result) = combine(&arena, "task-0");
        let mut patch = arena_patch(&arena, format!("combined outcome: {root_status:?}"));
        patch.context.insert(
            "root_status".to_string(),
            serde_json::to_value(root_status).unwrap_or_default(),
        );
        patch.context.insert("draft".to_string(), root_result.clone().into());
        patch.reasoning = Some(format!(
            "{} tasks processed across {} levels",
            arena.len(),
            arena.values().map(|t| t.decomposition_level).max().unwrap_or(0) + 1
        ));
        state.apply(patch);
        yield NodeEvent::new(nodes::COMBINE, &state);

        let mut patch = StatePatch::output(root_result);
        patch.stage = Some("complete".to_string());
        state.apply(patch);
        yield NodeEvent::new(nodes::FORMAT_OUTPUT, &state);
    })
}

async fn assess(
    engine: &Arc<WorkflowEngine>,
    description: &str,
    cancel: &CancellationToken,
) -> TaskComplexity {
    let content = engine
        .model_call(
            "Classify the complexity of this task. Reply with only a JSON object: \
             {\"complexity\": \"simple|medium|complex\"}",
            description,
            cancel,
        )
        .await;
    content
        .ok()
        .and_then(|c| parse_json_object::<AssessReply>(&c))
        .and_then(|reply| parse_complexity(&reply.complexity))
        .unwrap_or_else(|| heuristic_complexity(description))
}

async fn decompose(
    engine: &Arc<WorkflowEngine>,
    description: &str,
    cancel: &CancellationToken,
) -> (LogicalOperator, Vec<SubtaskReply>) {
    let content = engine
        .model_call(
            "Split this task into 2-4 subtasks. Reply with only a JSON object: \
             {\"operator\": \"and|or\", \"subtasks\": [{\"description\": \"...\", \
             \"complexity\": \"simple|medium|complex\"}]}",
            description,
            cancel,
        )
        .await;
    if let Some(reply) = content.ok().and_then(|c| parse_json_object::<DecomposeReply>(&c)) {
        if !reply.subtasks.is_empty() {
            let operator = match reply.operator.as_deref() {
                Some("or") => LogicalOperator::Or,
                _ => LogicalOperator::And,
            };
            return (operator, reply.subtasks);
        }
    }
    let subtasks = heuristic_subtasks(description)
        .into_iter()
        .map(|description| SubtaskReply {
            description,
            complexity: Some("simple".to_string()),
        })
        .collect();
    (LogicalOperator::And, subtasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, status: TaskStatus) -> AdaptTask {
        let mut t = AdaptTask::new(
            id,
            "do something",
            TaskComplexity::Simple,
            LogicalOperator::And,
            1,
            Some("task-0".to_string()),
        );
        // Drive the task to the requested state through legal
        // transitions.
        match status {
            TaskStatus::Pending => {}
            TaskStatus::Executing => t.transition(TaskStatus::Executing).unwrap(),
            TaskStatus::Completed => {
                t.transition(TaskStatus::Executing).unwrap();
                t.transition(TaskStatus::Completed).unwrap();
            }
            TaskStatus::Failed => {
                t.transition(TaskStatus::Executing).unwrap();
                t.transition(TaskStatus::Failed).unwrap();
            }
            TaskStatus::Decomposed => t.transition(TaskStatus::Decomposed).unwrap(),
        }
        t
    }

    #[test]
    fn transitions_are_strict() {
        let mut t = task("t", TaskStatus::Pending);
        assert!(t.transition(TaskStatus::Completed).is_err());
        t.transition(TaskStatus::Executing).unwrap();
        assert!(t.transition(TaskStatus::Decomposed).is_err());
        t.transition(TaskStatus::Completed).unwrap();
        assert!(t.transition(TaskStatus::Failed).is_err());
    }

    #[test]
    fn heuristics_scale_with_structure() {
        assert_eq!(heuristic_complexity("list files"), TaskComplexity::Simple);
        assert_eq!(
            heuristic_complexity(
                "read the configuration file and then migrate every handler to the new API"
            ),
            TaskComplexity::Complex
        );
    }

    fn arena_with_children(
        operator: LogicalOperator,
        child_states: &[(TaskStatus, &str)],
    ) -> HashMap<String, AdaptTask> {
        let mut arena = HashMap::new();
        let mut root = AdaptTask::new(
            "task-0",
            "root",
            TaskComplexity::Complex,
            LogicalOperator::And,
            0,
            None,
        );
        root.transition(TaskStatus::Decomposed).unwrap();
        for (i, (status, result)) in child_states.iter().enumerate() {
            let id = format!("task-{}", i + 1);
            let mut child = task(&id, *status);
            child.logical_operator = operator;
            child.result = Some(result.to_string());
            root.children.push(id.clone());
            arena.insert(id, child);
        }
        arena.insert("task-0".to_string(), root);
        arena
    }

    #[test]
    fn and_parent_needs_every_child() {
        let arena = arena_with_children(
            LogicalOperator::And,
            &[(TaskStatus::Completed, "a"), (TaskStatus::Completed, "b")],
        );
        let (status, result) = combine(&arena, "task-0");
        assert_eq!(status, TaskStatus::Completed);
        assert_eq!(result, "a\nb");

        let arena = arena_with_children(
            LogicalOperator::And,
            &[(TaskStatus::Completed, "a"), (TaskStatus::Failed, "boom")],
        );
        let (status, _) = combine(&arena, "task-0");
        assert_eq!(status, TaskStatus::Failed);
    }

    #[test]
    fn or_parent_takes_first_success() {
        let arena = arena_with_children(
            LogicalOperator::Or,
            &[(TaskStatus::Failed, "boom"), (TaskStatus::Completed, "b")],
        );
        let (status, result) = combine(&arena, "task-0");
        assert_eq!(status, TaskStatus::Completed);
        assert_eq!(result, "b");

        let arena = arena_with_children(
            LogicalOperator::Or,
            &[(TaskStatus::Failed, "x"), (TaskStatus::Failed, "y")],
        );
        let (status, _) = combine(&arena, "task-0");
        assert_eq!(status, TaskStatus::Failed);
    }
}
