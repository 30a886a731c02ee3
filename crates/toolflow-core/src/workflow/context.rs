//! Per-run execution context.
//!
//! `ExecutionContext` is the variable scope of a single run. It is seeded with
//! the initial params under the reserved `params` key and grows by one entry
//! per completed node. Only the run's control flow mutates it.

use std::collections::HashMap;

use serde_json::{Map, Value};
use toolflow_types::workflow::RESERVED_PARAMS_KEY;

use super::resolver::{self, ResolutionError};

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub workflow_name: String,
    params: Map<String, Value>,
    variables: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(execution_id: String, workflow_name: String, params: Map<String, Value>) -> Self {
        let mut variables = HashMap::new();
        variables.insert(
            RESERVED_PARAMS_KEY.to_string(),
            Value::Object(params.clone()),
        );
        Self {
            execution_id,
            workflow_name,
            params,
            variables,
        }
    }

    /// The run's initial params, unchanged for the whole run.
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    /// Record a completed node's result under its id.
    ///
    /// The reserved `params` key is never overwritten; validation keeps node
    /// ids away from it.
    pub fn set_result(&mut self, node_id: &str, result: Value) {
        if node_id == RESERVED_PARAMS_KEY {
            tracing::warn!(node_id, "refusing to overwrite reserved params variable");
            return;
        }
        self.variables.insert(node_id.to_string(), result);
    }

    pub fn result(&self, node_id: &str) -> Option<&Value> {
        self.variables.get(node_id)
    }

    /// Resolve a node's params against the current variables.
    pub fn resolve(&self, params: &Map<String, Value>) -> Result<Map<String, Value>, ResolutionError> {
        resolver::resolve_params(params, &self.variables)
    }
}
