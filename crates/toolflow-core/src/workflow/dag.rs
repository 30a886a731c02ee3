//! DAG builder, cycle detection, and wave computation.
//!
//! Uses `petgraph` to model node dependencies as a directed graph. Topological
//! sort detects cycles, and depth-based grouping produces execution waves in
//! which every node's dependencies sit in earlier waves.
//!
//! A node depends on the sources of its incoming edges and on every other
//! node its params reference (`${node_id...}`), so a referenced result is
//! always applied before the referencing node resolves its params.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use toolflow_types::workflow::{WorkflowDefinition, WorkflowNode};

use super::definition::ValidationError;
use super::resolver;

// ---------------------------------------------------------------------------
// Graph construction
// ---------------------------------------------------------------------------

/// Build the dependency graph (edge from dependency to dependent) and check
/// that every edge endpoint exists and no edge points at its own source.
fn build_graph(
    def: &WorkflowDefinition,
) -> Result<(DiGraph<&str, ()>, HashMap<&str, NodeIndex>), ValidationError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let indices: HashMap<&str, NodeIndex> = def
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), graph.add_node(n.id.as_str())))
        .collect();

    for edge in &def.edges {
        let from = indices.get(edge.source.as_str()).ok_or_else(|| {
            ValidationError::UnknownEdgeNode {
                from: edge.source.clone(),
                to: edge.target.clone(),
                missing: edge.source.clone(),
            }
        })?;
        let to = indices.get(edge.target.as_str()).ok_or_else(|| {
            ValidationError::UnknownEdgeNode {
                from: edge.source.clone(),
                to: edge.target.clone(),
                missing: edge.target.clone(),
            }
        })?;
        if from == to {
            return Err(ValidationError::SelfLoop(edge.source.clone()));
        }
        graph.add_edge(*from, *to, ());
    }

    for (source, target) in reference_edges(def) {
        graph.add_edge(indices[source], indices[target], ());
    }

    Ok((graph, indices))
}

/// Dependencies implied by parameter references, as `(referenced, referencing)`
/// pairs. Roots that name no node (`params`, unknown ids) and references to
/// the node itself contribute nothing.
fn reference_edges(def: &WorkflowDefinition) -> Vec<(&str, &str)> {
    let ids: HashSet<&str> = def.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut edges = Vec::new();
    for node in &def.nodes {
        for root in resolver::references(&node.params) {
            if let Some(&source) = ids.get(root.as_str()) {
                if source != node.id {
                    edges.push((source, node.id.as_str()));
                }
            }
        }
    }
    edges
}

/// Validate that the edges form a DAG over known nodes.
pub fn validate_dag(def: &WorkflowDefinition) -> Result<(), ValidationError> {
    let (graph, _) = build_graph(def)?;
    toposort(&graph, None).map_err(|cycle| {
        ValidationError::CycleDetected(graph[cycle.node_id()].to_string())
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Execution plan (wave computation)
// ---------------------------------------------------------------------------

/// Group nodes into execution waves.
///
/// A node's wave is the length of the longest dependency path leading to it,
/// so all of its dependencies land in earlier waves. Within a wave nodes keep
/// their definition order.
pub fn build_execution_plan(
    def: &WorkflowDefinition,
) -> Result<Vec<Vec<&WorkflowNode>>, ValidationError> {
    if def.nodes.is_empty() {
        return Ok(vec![]);
    }

    let (graph, indices) = build_graph(def)?;
    let sorted = toposort(&graph, None).map_err(|cycle| {
        ValidationError::CycleDetected(graph[cycle.node_id()].to_string())
    })?;

    // Depth: 0 for roots, otherwise 1 + deepest dependency
    let mut depths: HashMap<NodeIndex, usize> = HashMap::new();
    for idx in sorted {
        let depth = graph
            .neighbors_directed(idx, petgraph::Direction::Incoming)
            .map(|dep| depths.get(&dep).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(idx, depth);
    }

    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut waves: Vec<Vec<&WorkflowNode>> = vec![vec![]; max_depth + 1];
    for node in &def.nodes {
        let depth = depths[&indices[node.id.as_str()]];
        waves[depth].push(node);
    }

    Ok(waves)
}

// ---------------------------------------------------------------------------
// Dependency queries
// ---------------------------------------------------------------------------

/// Direct dependencies of every node without duplicates: edge sources in
/// edge order, then referenced nodes.
pub fn dependency_map(def: &WorkflowDefinition) -> HashMap<&str, Vec<&str>> {
    let mut deps: HashMap<&str, Vec<&str>> =
        def.nodes.iter().map(|n| (n.id.as_str(), Vec::new())).collect();
    let explicit = def
        .edges
        .iter()
        .map(|e| (e.source.as_str(), e.target.as_str()));
    for (source, target) in explicit.chain(reference_edges(def)) {
        if let Some(list) = deps.get_mut(target) {
            if !list.contains(&source) {
                list.push(source);
            }
        }
    }
    deps
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use toolflow_types::workflow::WorkflowEdge;

    fn workflow(ids: &[&str], edges: &[(&str, &str)]) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "test".to_string(),
            description: None,
            nodes: ids
                .iter()
                .map(|id| WorkflowNode::tool(*id, "srv", "tool"))
                .collect(),
            edges: edges
                .iter()
                .map(|(s, t)| WorkflowEdge::new(*s, *t))
                .collect(),
        }
    }

    fn wave_ids<'a>(waves: &[Vec<&'a WorkflowNode>]) -> Vec<Vec<&'a str>> {
        waves
            .iter()
            .map(|w| w.iter().map(|n| n.id.as_str()).collect())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Wave computation
    // -----------------------------------------------------------------------

    #[test]
    fn test_no_edges_single_wave() {
        let def = workflow(&["a", "b", "c"], &[]);
        let waves = build_execution_plan(&def).unwrap();
        assert_eq!(wave_ids(&waves), vec![vec!["a", "b", "c"]]);
    }

    #[test]
    fn test_linear_chain_n_waves() {
        let def = workflow(
            &["port-scan", "service-detection", "analyze", "save-report"],
            &[
                ("port-scan", "service-detection"),
                ("service-detection", "analyze"),
                ("analyze", "save-report"),
            ],
        );
        let waves = build_execution_plan(&def).unwrap();
        assert_eq!(
            wave_ids(&waves),
            vec![
                vec!["port-scan"],
                vec!["service-detection"],
                vec!["analyze"],
                vec!["save-report"]
            ]
        );
    }

    #[test]
    fn test_diamond_three_waves() {
        let def = workflow(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        let waves = build_execution_plan(&def).unwrap();
        assert_eq!(wave_ids(&waves), vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn test_reference_orders_nodes_without_edge() {
        let mut def = workflow(&["b", "a", "c"], &[]);
        def.nodes[0] = WorkflowNode::tool("b", "srv", "tool")
            .with_params(serde_json::json!({"y": "${a.x}", "t": "${params.target}"}));
        let waves = build_execution_plan(&def).unwrap();
        assert_eq!(wave_ids(&waves), vec![vec!["a", "c"], vec!["b"]]);
    }

    #[test]
    fn test_longest_path_decides_wave() {
        // a -> b -> c, and a -> c directly: c must still wait for b
        let def = workflow(&["c", "b", "a"], &[("a", "b"), ("b", "c"), ("a", "c")]);
        let waves = build_execution_plan(&def).unwrap();
        assert_eq!(wave_ids(&waves), vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    #[test]
    fn test_two_node_cycle_detected() {
        let def = workflow(&["a", "b"], &[("a", "b"), ("b", "a")]);
        let err = validate_dag(&def).unwrap_err();
        assert!(matches!(err, ValidationError::CycleDetected(_)));
        assert!(build_execution_plan(&def).is_err());
    }

    #[test]
    fn test_long_cycle_detected() {
        let def = workflow(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "d"), ("d", "b")],
        );
        assert!(matches!(
            validate_dag(&def).unwrap_err(),
            ValidationError::CycleDetected(_)
        ));
    }

    #[test]
    fn test_reference_against_edge_is_cycle() {
        // a runs after b, yet b reads a's result
        let mut def = workflow(&["a", "b"], &[("b", "a")]);
        def.nodes[1] = WorkflowNode::tool("b", "srv", "tool")
            .with_params(serde_json::json!({"y": "prefix ${a.x}"}));
        assert!(matches!(
            validate_dag(&def).unwrap_err(),
            ValidationError::CycleDetected(_)
        ));
    }

    #[test]
    fn test_self_reference_adds_no_edge() {
        let mut def = workflow(&["a"], &[]);
        def.nodes[0] =
            WorkflowNode::tool("a", "srv", "tool").with_params(serde_json::json!({"y": "${a}"}));
        assert!(validate_dag(&def).is_ok());
        assert!(dependency_map(&def)["a"].is_empty());
    }

    #[test]
    fn test_self_loop_rejected() {
        let def = workflow(&["a"], &[("a", "a")]);
        assert_eq!(
            validate_dag(&def).unwrap_err(),
            ValidationError::SelfLoop("a".to_string())
        );
    }

    #[test]
    fn test_unknown_edge_endpoint_rejected() {
        let def = workflow(&["a"], &[("a", "ghost")]);
        let err = validate_dag(&def).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UnknownEdgeNode { ref missing, .. } if missing == "ghost"
        ));
    }

    // -----------------------------------------------------------------------
    // Dependency queries
    // -----------------------------------------------------------------------

    #[test]
    fn test_dependency_map_dedupes() {
        let def = workflow(&["a", "b"], &[("a", "b"), ("a", "b")]);
        let deps = dependency_map(&def);
        assert_eq!(deps["b"], vec!["a"]);
        assert!(deps["a"].is_empty());
    }

    #[test]
    fn test_dependency_map_includes_references() {
        let mut def = workflow(&["a", "b", "c"], &[("a", "c")]);
        def.nodes[2] = WorkflowNode::tool("c", "srv", "tool")
            .with_params(serde_json::json!({"from_a": "${a.x}", "from_b": ["${b}"]}));
        let deps = dependency_map(&def);
        assert_eq!(deps["c"], vec!["a", "b"]);
    }
}
