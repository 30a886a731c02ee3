//! Workflow definition parsing and validation.
//!
//! Validation runs once per run, before any node executes. It checks the
//! structural constraints (name, node ids, server/tool, edges, acyclicity) and
//! that every `${...}` reference names either `params` or a node that exists.
//! Whether a referenced node actually completes is only known at run time.

use std::collections::HashSet;

use thiserror::Error;
use toolflow_types::workflow::{RESERVED_PARAMS_KEY, WorkflowDefinition};

use super::dag;
use super::resolver;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// A definition that can never run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("workflow name must not be empty")]
    EmptyName,

    #[error("workflow must have at least one node")]
    NoNodes,

    #[error("node id must not be empty")]
    EmptyNodeId,

    #[error("node id '{0}' must not contain '.'")]
    InvalidNodeId(String),

    #[error("node id 'params' is reserved")]
    ReservedNodeId,

    #[error("duplicate node id: '{0}'")]
    DuplicateNodeId(String),

    #[error("node '{0}' has no server")]
    MissingServer(String),

    #[error("node '{0}' has no tool")]
    MissingTool(String),

    #[error("edge '{from}' -> '{to}' references unknown node '{missing}'")]
    UnknownEdgeNode {
        from: String,
        to: String,
        missing: String,
    },

    #[error("node '{0}' depends on itself")]
    SelfLoop(String),

    #[error("cycle detected involving node '{0}'")]
    CycleDetected(String),

    #[error("node '{node}' references unknown value '{root}'")]
    UnknownReference { node: String, root: String },
}

/// Failure to turn text into a valid definition.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid workflow: {0}")]
    Invalid(#[from] ValidationError),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a JSON document into a validated `WorkflowDefinition`.
pub fn parse_definition(json: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_json::from_str(json).map_err(|e| WorkflowError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks, in order:
/// - name is non-empty and at least one node exists
/// - node ids are non-empty, unique, free of `.`, and not `params`
/// - every node names a server and a tool
/// - edges reference known nodes, contain no self-loops, and form no cycle
/// - every reference root is `params` or an existing node id
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), ValidationError> {
    if def.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if def.nodes.is_empty() {
        return Err(ValidationError::NoNodes);
    }

    let mut seen_ids = HashSet::new();
    for node in &def.nodes {
        if node.id.is_empty() {
            return Err(ValidationError::EmptyNodeId);
        }
        if node.id.contains('.') {
            return Err(ValidationError::InvalidNodeId(node.id.clone()));
        }
        if node.id == RESERVED_PARAMS_KEY {
            return Err(ValidationError::ReservedNodeId);
        }
        if !seen_ids.insert(node.id.as_str()) {
            return Err(ValidationError::DuplicateNodeId(node.id.clone()));
        }
        if node.server.trim().is_empty() {
            return Err(ValidationError::MissingServer(node.id.clone()));
        }
        if node.tool.trim().is_empty() {
            return Err(ValidationError::MissingTool(node.id.clone()));
        }
    }

    dag::validate_dag(def)?;

    for node in &def.nodes {
        for root in resolver::references(&node.params) {
            if root != RESERVED_PARAMS_KEY && !seen_ids.contains(root.as_str()) {
                return Err(ValidationError::UnknownReference {
                    node: node.id.clone(),
                    root,
                });
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
