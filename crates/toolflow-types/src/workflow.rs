//! Workflow definition types.
//!
//! A workflow is a set of tool-invocation nodes plus dependency edges. The
//! JSON shape is `{name, nodes:[{id, type, server, tool, params}],
//! edges:[{source, target}]}`. Definitions are immutable once a run starts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved variable key under which a run's initial parameters are stored.
///
/// No node may use this as its id.
pub const RESERVED_PARAMS_KEY: &str = "params";

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A complete workflow: named DAG of tool invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Nodes of the graph. Ids are unique within the workflow.
    pub nodes: Vec<WorkflowNode>,
    /// Dependency edges (`target` depends on `source`).
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

impl WorkflowDefinition {
    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Distinct tool-server ids referenced by the workflow, in first-use order.
    pub fn servers(&self) -> Vec<String> {
        let mut servers: Vec<String> = Vec::new();
        for node in &self.nodes {
            if !servers.contains(&node.server) {
                servers.push(node.server.clone());
            }
        }
        servers
    }
}

// ---------------------------------------------------------------------------
// Nodes and edges
// ---------------------------------------------------------------------------

/// A single unit of work: one tool call on one tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique id; doubles as the key under which the result is referenced.
    pub id: String,
    /// Node kind. Only tool invocations exist today.
    #[serde(rename = "type", default)]
    pub node_type: NodeType,
    /// Target tool-server id.
    pub server: String,
    /// Tool name on that server.
    pub tool: String,
    /// Tool arguments; string values may contain `${...}` references.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Per-node call timeout in seconds (engine default when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl WorkflowNode {
    /// Convenience constructor for a tool node without params.
    pub fn tool(id: impl Into<String>, server: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: NodeType::Tool,
            server: server.into(),
            tool: tool.into(),
            params: Map::new(),
            timeout_secs: None,
        }
    }

    /// Builder-style params setter. Non-object values are ignored.
    pub fn with_params(mut self, params: Value) -> Self {
        if let Value::Object(map) = params {
            self.params = map;
        }
        self
    }
}

/// The kind of node in a workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Invoke a tool on a tool server.
    #[default]
    Tool,
}

/// Ordered pair of node ids: `target` depends on `source`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub source: String,
    pub target: String,
}

impl WorkflowEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A definition held by a workflow repository under a stable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredWorkflow {
    pub id: String,
    pub definition: WorkflowDefinition,
}

// ---------------------------------------------------------------------------
// Invocation request
// ---------------------------------------------------------------------------

/// Where the workflow for a run comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkflowSource {
    /// Definition stored in a repository, referenced by id.
    Reference { workflow_id: String },
    /// Definition supplied inline with the request.
    Inline(WorkflowDefinition),
}

/// A request to execute a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Inline definition or repository reference.
    pub workflow: WorkflowSource,
    /// Initial parameters, exposed to nodes as `${params.<key>}`.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Caller-assigned execution id; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
