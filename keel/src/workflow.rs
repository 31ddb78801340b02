//! Workflow types — specs, graph shape, and the state reducer.
//!
//! A [`WorkflowSpec`] is data: node and edge declarations plus
//! parameters. Handlers are attached at compile time by the engine, not
//! carried here. [`WorkflowState`] is the single value threaded through
//! execution; nodes return [`StatePatch`]es and the reducer in
//! [`WorkflowState::apply`] owns the merge.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::AgentError;
use crate::id::WorkflowId;
use crate::request::MetadataMap;
use crate::tool::ToolResult;
use chrono::{DateTime, Utc};

/// A named cognitive/workflow strategy. Determines the node layout and
/// whether back-edges are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pattern {
    /// Structured analysis with sequential thinking.
    Analytical,
    /// Divergent generation with an ideation step.
    Creative,
    /// Diagnose-then-fix with a diagnostics step.
    ProblemSolving,
    /// Lookup-and-summarise.
    Informational,
    /// Plain conversational fallback.
    Conversational,
    /// Reason-act-observe loop.
    React,
    /// Plan, work, solve.
    Rewoo,
    /// Recursive decomposition.
    Adapt,
}

impl Pattern {
    /// Whether the pattern's graph may contain back-edges. Only the
    /// iterative patterns loop; everything else must stay a DAG.
    pub fn allows_cycles(&self) -> bool {
        matches!(self, Pattern::React | Pattern::Adapt)
    }

    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Pattern::Analytical => "analytical",
            Pattern::Creative => "creative",
            Pattern::ProblemSolving => "problem-solving",
            Pattern::Informational => "informational",
            Pattern::Conversational => "conversational",
            Pattern::React => "react",
            Pattern::Rewoo => "rewoo",
            Pattern::Adapt => "adapt",
        }
    }

    /// Parse a canonical name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "analytical" => Some(Pattern::Analytical),
            "creative" => Some(Pattern::Creative),
            "problem-solving" => Some(Pattern::ProblemSolving),
            "informational" => Some(Pattern::Informational),
            "conversational" => Some(Pattern::Conversational),
            "react" => Some(Pattern::React),
            "rewoo" => Some(Pattern::Rewoo),
            "adapt" => Some(Pattern::Adapt),
            _ => None,
        }
    }

    /// All patterns, for precompilation.
    pub fn all() -> &'static [Pattern] {
        &[
            Pattern::Analytical,
            Pattern::Creative,
            Pattern::ProblemSolving,
            Pattern::Informational,
            Pattern::Conversational,
            Pattern::React,
            Pattern::Rewoo,
            Pattern::Adapt,
        ]
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a node does. Informs validation and progress reporting; the
/// actual behaviour is the handler the engine attaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Ingests and normalises the request input.
    Input,
    /// General transformation.
    Processing,
    /// Invokes tools through the gateway.
    Tool,
    /// Model-driven reasoning.
    Reasoning,
    /// Produces the final output.
    Output,
    /// Splits a task into subtasks (ADaPT).
    Decomposition,
}

/// Declaration of one workflow node.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique node id within the spec.
    pub id: String,
    /// The node's role.
    pub kind: NodeKind,
    /// Whether this node is the entry point. Exactly one node per spec
    /// declares this.
    #[serde(default)]
    pub entry: bool,
}

impl NodeSpec {
    /// A non-entry node.
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            entry: false,
        }
    }

    /// The entry node.
    pub fn entry(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            entry: true,
        }
    }
}

/// A directed edge between two nodes, optionally guarded.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// Optional condition name evaluated by the engine.
    pub condition: Option<String>,
}

impl EdgeSpec {
    /// An unconditional edge.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }
}

/// A compiled-from or extracted-from-input workflow description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Unique id of this workflow execution.
    pub id: WorkflowId,
    /// The cognitive pattern.
    pub pattern: Pattern,
    /// Node declarations.
    pub nodes: Vec<NodeSpec>,
    /// Edge declarations.
    pub edges: Vec<EdgeSpec>,
    /// Pattern parameters (max steps, decomposition depth, mode).
    #[serde(default)]
    pub params: MetadataMap,
    /// Tools the workflow expects to be available.
    #[serde(default)]
    pub required_tools: Vec<String>,
}

impl WorkflowSpec {
    /// The declared entry node id, if exactly one node declares entry.
    pub fn entry_node(&self) -> Option<&str> {
        let mut entries = self.nodes.iter().filter(|n| n.entry);
        match (entries.next(), entries.next()) {
            (Some(node), None) => Some(node.id.as_str()),
            _ => None,
        }
    }

    /// Validate the structural invariants: node ids unique, exactly one
    /// entry, edges reference declared nodes, and the graph is acyclic
    /// unless the pattern permits back-edges.
    pub fn validate(&self) -> Result<(), AgentError> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(AgentError::validation(
                    "DUPLICATE_NODE",
                    format!("duplicate node id: {}", node.id),
                ));
            }
        }
        if self.entry_node().is_none() {
            return Err(AgentError::validation(
                "BAD_ENTRY",
                "workflow must declare exactly one entry node",
            ));
        }
        for edge in &self.edges {
            if !ids.contains(edge.from.as_str()) || !ids.contains(edge.to.as_str()) {
                return Err(AgentError::validation(
                    "DANGLING_EDGE",
                    format!("edge {} -> {} references an unknown node", edge.from, edge.to),
                ));
            }
        }
        if !self.pattern.allows_cycles() && self.has_cycle() {
            return Err(AgentError::validation(
                "CYCLIC_GRAPH",
                format!("pattern {} requires an acyclic graph", self.pattern),
            ));
        }
        Ok(())
    }

    /// Cycle detection by iterative DFS with colour marking.
    fn has_cycle(&self) -> bool {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            adjacency
                .entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
        }
        // 0 = unvisited, 1 = on stack, 2 = done
        let mut colour: HashMap<&str, u8> = HashMap::new();
        for node in &self.nodes {
            if colour.get(node.id.as_str()).copied().unwrap_or(0) != 0 {
                continue;
            }
            let mut stack: Vec<(&str, usize)> = vec![(node.id.as_str(), 0)];
            colour.insert(node.id.as_str(), 1);
            while let Some((current, next_child)) = stack.pop() {
                let children = adjacency.get(current).map(Vec::as_slice).unwrap_or(&[]);
                if next_child < children.len() {
                    stack.push((current, next_child + 1));
                    let child = children[next_child];
                    match colour.get(child).copied().unwrap_or(0) {
                        1 => return true,
                        0 => {
                            colour.insert(child, 1);
                            stack.push((child, 0));
                        }
                        _ => {}
                    }
                } else {
                    colour.insert(current, 2);
                }
            }
        }
        false
    }

    /// Topological order of node ids. Errors when the graph is cyclic.
    pub fn topological_order(&self) -> Result<Vec<String>, AgentError> {
        let mut indegree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            adjacency
                .entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
            if let Some(d) = indegree.get_mut(edge.to.as_str()) {
                *d += 1;
            }
        }
        // Seed with zero-indegree nodes in declaration order so the
        // walk is deterministic.
        let mut ready: Vec<&str> = self
            .nodes
            .iter()
            .filter(|n| indegree[n.id.as_str()] == 0)
            .map(|n| n.id.as_str())
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(current) = ready.first().copied() {
            ready.remove(0);
            order.push(current.to_string());
            for &child in adjacency.get(current).map(Vec::as_slice).unwrap_or(&[]) {
                let d = indegree.get_mut(child).expect("edge validated");
                *d -= 1;
                if *d == 0 {
                    ready.push(child);
                }
            }
        }
        if order.len() != self.nodes.len() {
            return Err(AgentError::validation(
                "CYCLIC_GRAPH",
                "cannot order a cyclic graph",
            ));
        }
        Ok(order)
    }
}

/// Execution bookkeeping inside [`WorkflowState`].
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMeta {
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// Current stage label.
    pub stage: Option<String>,
    /// Step descriptions, append-only.
    #[serde(default)]
    pub steps: Vec<String>,
    /// Per-key performance numbers, merged by key.
    #[serde(default)]
    pub perf: HashMap<String, f64>,
}

impl Default for StateMeta {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            stage: None,
            steps: vec![],
            perf: HashMap::new(),
        }
    }
}

/// The single value threaded through workflow execution.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// The original request input.
    pub input: String,
    /// Name of the executing pattern.
    pub pattern_name: String,
    /// Session domain tag.
    pub domain: String,
    /// Free-form working context; later writes win per key.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// Tool results, append-only in completion order.
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    /// Accumulated reasoning text.
    #[serde(default)]
    pub reasoning: String,
    /// The final output once the terminal node has run.
    #[serde(default)]
    pub output: String,
    /// Execution bookkeeping.
    #[serde(default)]
    pub meta: StateMeta,
}

impl WorkflowState {
    /// Fresh state for an input, stamped now.
    pub fn new(input: impl Into<String>, pattern: Pattern, domain: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            pattern_name: pattern.name().to_string(),
            domain: domain.into(),
            context: HashMap::new(),
            tool_results: vec![],
            reasoning: String::new(),
            output: String::new(),
            meta: StateMeta::default(),
        }
    }

    /// Merge a node's patch into the state.
    ///
    /// Reducer rules: `tool_results` and `steps` append; `perf` merges
    /// by key (later write wins per key); `context` merges by key;
    /// scalar fields overwrite only when the patch sets them.
    pub fn apply(&mut self, patch: StatePatch) {
        self.context.extend(patch.context);
        self.tool_results.extend(patch.tool_results);
        if let Some(reasoning) = patch.reasoning {
            self.reasoning = reasoning;
        }
        if let Some(output) = patch.output {
            self.output = output;
        }
        if let Some(stage) = patch.stage {
            self.meta.stage = Some(stage);
        }
        self.meta.steps.extend(patch.steps);
        self.meta.perf.extend(patch.perf);
    }
}

/// What one node execution contributes to the state.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatePatch {
    /// Context entries to merge.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// Tool results to append.
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    /// Replacement reasoning text.
    pub reasoning: Option<String>,
    /// Replacement output text.
    pub output: Option<String>,
    /// New stage label.
    pub stage: Option<String>,
    /// Step descriptions to append.
    #[serde(default)]
    pub steps: Vec<String>,
    /// Perf entries to merge.
    #[serde(default)]
    pub perf: HashMap<String, f64>,
}

impl StatePatch {
    /// A patch that only records a step description.
    pub fn step(description: impl Into<String>) -> Self {
        Self {
            steps: vec![description.into()],
            ..Self::default()
        }
    }

    /// A patch that only sets the output.
    pub fn output(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_spec(pattern: Pattern) -> WorkflowSpec {
        WorkflowSpec {
            id: WorkflowId::new("wf-1"),
            pattern,
            nodes: vec![
                NodeSpec::entry("a", NodeKind::Input),
                NodeSpec::new("b", NodeKind::Processing),
                NodeSpec::new("c", NodeKind::Output),
            ],
            edges: vec![EdgeSpec::new("a", "b"), EdgeSpec::new("b", "c")],
            params: MetadataMap::new(),
            required_tools: vec![],
        }
    }

    #[test]
    fn linear_spec_validates_and_orders() {
        let spec = linear_spec(Pattern::Analytical);
        spec.validate().unwrap();
        assert_eq!(spec.topological_order().unwrap(), ["a", "b", "c"]);
    }

    #[test]
    fn cycle_rejected_for_dag_patterns() {
        let mut spec = linear_spec(Pattern::Rewoo);
        spec.edges.push(EdgeSpec::new("c", "a"));
        let err = spec.validate().unwrap_err();
        assert_eq!(err.code, "CYCLIC_GRAPH");
    }

    #[test]
    fn cycle_allowed_for_react_and_adapt() {
        for pattern in [Pattern::React, Pattern::Adapt] {
            let mut spec = linear_spec(pattern);
            spec.edges.push(EdgeSpec::new("c", "a"));
            spec.validate().unwrap();
        }
    }

    #[test]
    fn entry_must_be_unique() {
        let mut spec = linear_spec(Pattern::Analytical);
        spec.nodes[1].entry = true;
        assert_eq!(spec.validate().unwrap_err().code, "BAD_ENTRY");
        spec.nodes[0].entry = false;
        spec.nodes[1].entry = false;
        assert_eq!(spec.validate().unwrap_err().code, "BAD_ENTRY");
    }

    #[test]
    fn dangling_edge_rejected() {
        let mut spec = linear_spec(Pattern::Analytical);
        spec.edges.push(EdgeSpec::new("c", "ghost"));
        assert_eq!(spec.validate().unwrap_err().code, "DANGLING_EDGE");
    }

    #[test]
    fn reducer_appends_and_merges() {
        let mut state = WorkflowState::new("task", Pattern::Analytical, "coding");
        state.apply(StatePatch {
            steps: vec!["first".into()],
            perf: HashMap::from([("a".into(), 1.0)]),
            ..StatePatch::default()
        });
        state.apply(StatePatch {
            steps: vec!["second".into()],
            perf: HashMap::from([("a".into(), 2.0), ("b".into(), 3.0)]),
            reasoning: Some("because".into()),
            ..StatePatch::default()
        });
        assert_eq!(state.meta.steps, ["first", "second"]);
        assert_eq!(state.meta.perf["a"], 2.0);
        assert_eq!(state.meta.perf["b"], 3.0);
        assert_eq!(state.reasoning, "because");
    }

    #[test]
    fn pattern_names_roundtrip() {
        for p in Pattern::all() {
            assert_eq!(Pattern::parse(p.name()), Some(*p));
        }
    }
}
