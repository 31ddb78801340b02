//! Pattern compilation: canonical node graphs and customizations.

use keel::{AgentError, EdgeSpec, MetadataMap, NodeKind, NodeSpec, Pattern, WorkflowId, WorkflowSpec};

/// Canonical node ids shared by every DAG pattern.
pub mod nodes {
    /// Entry: normalises the request input.
    pub const PROCESS_INPUT: &str = "process_input";
    /// Adds domain/session context.
    pub const ENRICH_CONTEXT: &str = "enrich_context";
    /// Analytical insert.
    pub const SEQUENTIAL_THINKING: &str = "sequential_thinking";
    /// Creative insert.
    pub const IDEATION: &str = "ideation";
    /// Problem-solving insert.
    pub const DIAGNOSTICS: &str = "diagnostics";
    /// Runs the spec's tools through the gateway.
    pub const EXECUTE_TOOLS: &str = "execute_tools";
    /// Model-driven reasoning over input + tool results.
    pub const REASONING: &str = "reasoning";
    /// Drafts the final answer.
    pub const SYNTHESIZE: &str = "synthesize";
    /// Terminal: formats the output.
    pub const FORMAT_OUTPUT: &str = "format_output";

    /// ReAct loop nodes.
    pub const THINK: &str = "think";
    /// ReAct: tool invocation.
    pub const ACT: &str = "act";
    /// ReAct: records the observation.
    pub const OBSERVE: &str = "observe";
    /// ReAct: completion check, loops back to `think`.
    pub const DECIDE: &str = "decide";

    /// ReWOO phases.
    pub const PLANNER: &str = "planner";
    /// ReWOO: executes plan steps in dependency waves.
    pub const WORKER: &str = "worker";
    /// ReWOO: synthesises from evidence.
    pub const SOLVER: &str = "solver";

    /// ADaPT nodes.
    pub const ASSESS: &str = "assess";
    /// ADaPT: splits a complex task.
    pub const DECOMPOSE: &str = "decompose";
    /// ADaPT: runs a leaf task.
    pub const EXECUTE: &str = "execute";
    /// ADaPT: combines child outcomes.
    pub const COMBINE: &str = "combine";
}

/// A graph customization applied on top of a canonical pattern.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Customization {
    /// Insert a node between `after` and its current successors.
    InsertNode {
        /// The node to insert.
        node: NodeSpec,
        /// Existing node the new one follows.
        after: String,
    },
    /// Append a node with explicit edges added separately.
    AppendNode(NodeSpec),
    /// Add an edge between existing nodes.
    AddEdge(EdgeSpec),
}

/// Build the canonical spec for a pattern.
///
/// DAG patterns share the chain `process_input → enrich_context →
/// (insert) → execute_tools → reasoning → synthesize → format_output`;
/// react and adapt carry their loop back-edges.
pub fn build_pattern_spec(pattern: Pattern, id: WorkflowId) -> WorkflowSpec {
    let (nodes, edges) = match pattern {
        Pattern::React => react_graph(),
        Pattern::Rewoo => rewoo_graph(),
        Pattern::Adapt => adapt_graph(),
        Pattern::Analytical => dag_graph(Some((nodes::SEQUENTIAL_THINKING, NodeKind::Reasoning))),
        Pattern::Creative => dag_graph(Some((nodes::IDEATION, NodeKind::Reasoning))),
        Pattern::ProblemSolving => dag_graph(Some((nodes::DIAGNOSTICS, NodeKind::Processing))),
        Pattern::Informational | Pattern::Conversational => dag_graph(None),
    };
    WorkflowSpec {
        id,
        pattern,
        nodes,
        edges,
        params: MetadataMap::new(),
        required_tools: vec![],
    }
}

fn chain(nodes: &[NodeSpec]) -> Vec<EdgeSpec> {
    nodes
        .windows(2)
        .map(|pair| EdgeSpec::new(pair[0].id.clone(), pair[1].id.clone()))
        .collect()
}

fn dag_graph(insert: Option<(&str, NodeKind)>) -> (Vec<NodeSpec>, Vec<EdgeSpec>) {
    let mut nodes = vec![
        NodeSpec::entry(nodes::PROCESS_INPUT, NodeKind::Input),
        NodeSpec::new(nodes::ENRICH_CONTEXT, NodeKind::Processing),
    ];
    if let Some((id, kind)) = insert {
        nodes.push(NodeSpec::new(id, kind));
    }
    nodes.extend([
        NodeSpec::new(nodes::EXECUTE_TOOLS, NodeKind::Tool),
        NodeSpec::new(nodes::REASONING, NodeKind::Reasoning),
        NodeSpec::new(nodes::SYNTHESIZE, NodeKind::Processing),
        NodeSpec::new(nodes::FORMAT_OUTPUT, NodeKind::Output),
    ]);
    let edges = chain(&nodes);
    (nodes, edges)
}

fn react_graph() -> (Vec<NodeSpec>, Vec<EdgeSpec>) {
    let nodes = vec![
        NodeSpec::entry(nodes::PROCESS_INPUT, NodeKind::Input),
        NodeSpec::new(nodes::THINK, NodeKind::Reasoning),
        NodeSpec::new(nodes::ACT, NodeKind::Tool),
        NodeSpec::new(nodes::OBSERVE, NodeKind::Processing),
        NodeSpec::new(nodes::DECIDE, NodeKind::Processing),
        NodeSpec::new(nodes::FORMAT_OUTPUT, NodeKind::Output),
    ];
    let mut edges = chain(&nodes[..5]);
    let mut back = EdgeSpec::new(nodes::DECIDE, nodes::THINK);
    back.condition = Some("continue".to_string());
    edges.push(back);
    let mut done = EdgeSpec::new(nodes::DECIDE, nodes::FORMAT_OUTPUT);
    done.condition = Some("complete".to_string());
    edges.push(done);
    (nodes, edges)
}

fn rewoo_graph() -> (Vec<NodeSpec>, Vec<EdgeSpec>) {
    let nodes = vec![
        NodeSpec::entry(nodes::PROCESS_INPUT, NodeKind::Input),
        NodeSpec::new(nodes::PLANNER, NodeKind::Reasoning),
        NodeSpec::new(nodes::WORKER, NodeKind::Tool),
        NodeSpec::new(nodes::SOLVER, NodeKind::Reasoning),
        NodeSpec::new(nodes::FORMAT_OUTPUT, NodeKind::Output),
    ];
    let edges = chain(&nodes);
    (nodes, edges)
}

fn adapt_graph() -> (Vec<NodeSpec>, Vec<EdgeSpec>) {
    let nodes = vec![
        NodeSpec::entry(nodes::PROCESS_INPUT, NodeKind::Input),
        NodeSpec::new(nodes::ASSESS, NodeKind::Processing),
        NodeSpec::new(nodes::DECOMPOSE, NodeKind::Decomposition),
        NodeSpec::new(nodes::EXECUTE, NodeKind::Tool),
        NodeSpec::new(nodes::COMBINE, NodeKind::Processing),
        NodeSpec::new(nodes::FORMAT_OUTPUT, NodeKind::Output),
    ];
    let conditional = |from: &str, to: &str, condition: &str| {
        let mut edge = EdgeSpec::new(from, to);
        edge.condition = Some(condition.to_string());
        edge
    };
    let edges = vec![
        EdgeSpec::new(nodes::PROCESS_INPUT, nodes::ASSESS),
        conditional(nodes::ASSESS, nodes::DECOMPOSE, "complex"),
        conditional(nodes::ASSESS, nodes::EXECUTE, "simple"),
        conditional(nodes::DECOMPOSE, nodes::ASSESS, "recurse"),
        EdgeSpec::new(nodes::EXECUTE, nodes::COMBINE),
        EdgeSpec::new(nodes::COMBINE, nodes::FORMAT_OUTPUT),
    ];
    (nodes, edges)
}

/// Apply customizations, then re-validate the graph: it must keep
/// exactly one entry, stay connected from the entry, and terminate.
pub fn customize(
    mut spec: WorkflowSpec,
    customizations: Vec<Customization>,
) -> Result<WorkflowSpec, AgentError> {
    for customization in customizations {
        match customization {
            Customization::InsertNode { node, after } => {
                if !spec.nodes.iter().any(|n| n.id == after) {
                    return Err(AgentError::validation(
                        "UNKNOWN_NODE",
                        format!("cannot insert after unknown node {after}"),
                    ));
                }
                // Redirect after's outgoing edges through the new node.
                for edge in spec.edges.iter_mut().filter(|e| e.from == after) {
                    edge.from = node.id.clone();
                }
                spec.edges.push(EdgeSpec::new(after, node.id.clone()));
                spec.nodes.push(node);
            }
            Customization::AppendNode(node) => spec.nodes.push(node),
            Customization::AddEdge(edge) => spec.edges.push(edge),
        }
    }
    spec.validate()?;
    ensure_connected(&spec)?;
    Ok(spec)
}

/// Every node must be reachable from the entry.
fn ensure_connected(spec: &WorkflowSpec) -> Result<(), AgentError> {
    let entry = spec
        .entry_node()
        .ok_or_else(|| AgentError::validation("BAD_ENTRY", "missing entry node"))?;
    let mut reachable = std::collections::HashSet::new();
    let mut stack = vec![entry];
    while let Some(current) = stack.pop() {
        if !reachable.insert(current) {
            continue;
        }
        for edge in spec.edges.iter().filter(|e| e.from == current) {
            stack.push(edge.to.as_str());
        }
    }
    if let Some(unreachable) = spec.nodes.iter().find(|n| !reachable.contains(n.id.as_str())) {
        return Err(AgentError::validation(
            "DISCONNECTED_GRAPH",
            format!("node {} is unreachable from the entry", unreachable.id),
        ));
    }
    Ok(())
}
