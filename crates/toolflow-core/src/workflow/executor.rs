//! Workflow executor: wave-based DAG execution over a `ToolInvoker`.
//!
//! The `DagExecutor` processes nodes in topological wave order. Tool calls
//! within a wave run concurrently on a `tokio::JoinSet`, bounded by a per-run
//! semaphore; results are applied in node order once the wave drains.
//!
//! # Execution flow
//!
//! 1. Validate the definition and compute waves. On failure the sink gets a
//!    single `error` event and nothing runs.
//! 2. Seed the context with `params`, mark every node `pending`.
//! 3. For each wave: skip nodes whose dependencies did not complete, resolve
//!    params for the rest, and spawn their tool calls.
//! 4. Apply outcomes: `completed` results become referenceable variables,
//!    failures are recorded as `"<node_id>: <message>"`.
//! 5. Derive the overall status and emit exactly one `complete` event.
//!
//! Cancellation is cooperative: the token is checked before every wave and
//! every node start, and is handed to each in-flight call.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use toolflow_types::config::EngineConfig;
use toolflow_types::event::ProgressEvent;
use toolflow_types::run::{
    ExecutionResult, LogEntry, LogLevel, NodeState, NodeStatus, RunStatus,
};
use toolflow_types::workflow::{WorkflowDefinition, WorkflowNode};
use tracing::{debug, info, warn};

use crate::event::ProgressSink;
use crate::protocol::{InvokeError, ToolInvoker};

use super::context::ExecutionContext;
use super::dag::{build_execution_plan, dependency_map};
use super::definition::{ValidationError, validate_definition};

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

/// Errors that prevent a run from happening at all.
///
/// Node failures are not errors at this level; they end up in the
/// `ExecutionResult`.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("invalid workflow: {0}")]
    Validation(#[from] ValidationError),

    #[error("execution '{0}' is already running")]
    AlreadyRunning(String),

    #[error("execution not found: {0}")]
    RunNotFound(String),
}

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

/// Mutable state of one run, owned by its control flow.
///
/// Every status change and log line is mirrored to the sink as it happens.
struct RunRecorder<'a> {
    ctx: ExecutionContext,
    order: Vec<String>,
    states: HashMap<String, NodeState>,
    results: Map<String, Value>,
    errors: Vec<String>,
    logs: Vec<LogEntry>,
    sink: &'a dyn ProgressSink,
    started_at: DateTime<Utc>,
}

impl<'a> RunRecorder<'a> {
    fn new(
        definition: &WorkflowDefinition,
        execution_id: &str,
        params: Map<String, Value>,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        let order: Vec<String> = definition.nodes.iter().map(|n| n.id.clone()).collect();
        let states = order
            .iter()
            .map(|id| (id.clone(), NodeState::pending(id.clone())))
            .collect();
        for id in &order {
            sink.emit(ProgressEvent::NodeState {
                node_id: id.clone(),
                status: NodeStatus::Pending,
            });
        }
        Self {
            ctx: ExecutionContext::new(execution_id.to_string(), definition.name.clone(), params),
            order,
            states,
            results: Map::new(),
            errors: Vec::new(),
            logs: Vec::new(),
            sink,
            started_at: Utc::now(),
        }
    }

    fn log(&mut self, level: LogLevel, node_id: Option<&str>, message: impl Into<String>) {
        let entry = LogEntry::new(level, node_id, message);
        self.sink.emit(ProgressEvent::Log { log: entry.clone() });
        self.logs.push(entry);
    }

    fn status(&self, node_id: &str) -> NodeStatus {
        self.states
            .get(node_id)
            .map_or(NodeStatus::Pending, |s| s.status)
    }

    fn transition(&mut self, node_id: &str, next: NodeStatus) -> bool {
        let Some(state) = self.states.get_mut(node_id) else {
            return false;
        };
        if !state.status.can_transition_to(next) {
            warn!(node_id, from = %state.status, to = %next, "ignoring illegal node transition");
            return false;
        }
        state.status = next;
        self.sink.emit(ProgressEvent::NodeState {
            node_id: node_id.to_string(),
            status: next,
        });
        true
    }

    fn start(&mut self, node: &WorkflowNode) {
        if self.transition(&node.id, NodeStatus::Running) {
            self.log(
                LogLevel::Info,
                Some(&node.id),
                format!("calling {}/{}", node.server, node.tool),
            );
        }
    }

    fn complete(&mut self, node_id: &str, result: Value) {
        if !self.transition(node_id, NodeStatus::Completed) {
            return;
        }
        if let Some(state) = self.states.get_mut(node_id) {
            state.result = Some(result.clone());
        }
        self.ctx.set_result(node_id, result.clone());
        self.results.insert(node_id.to_string(), result);
        self.log(LogLevel::Info, Some(node_id), "completed");
    }

    fn fail(&mut self, node_id: &str, message: &str) {
        if !self.transition(node_id, NodeStatus::Error) {
            return;
        }
        if let Some(state) = self.states.get_mut(node_id) {
            state.error = Some(message.to_string());
        }
        warn!(execution_id = %self.ctx.execution_id, node_id, error = message, "node failed");
        self.errors.push(format!("{node_id}: {message}"));
        self.log(LogLevel::Error, Some(node_id), message);
    }

    fn skip(&mut self, node_id: &str, reason: &str) {
        if self.transition(node_id, NodeStatus::Skipped) {
            self.log(LogLevel::Warn, Some(node_id), format!("skipped: {reason}"));
        }
    }

    /// Settle every non-terminal node and build the final report.
    fn finish(mut self, cancelled: bool) -> ExecutionResult {
        let leftover: Vec<String> = self
            .order
            .iter()
            .filter(|id| !self.status(id).is_terminal())
            .cloned()
            .collect();
        let reason = if cancelled { "run cancelled" } else { "not executed" };
        for id in leftover {
            match self.status(&id) {
                NodeStatus::Pending => self.skip(&id, reason),
                NodeStatus::Running => self.fail(&id, "tool call ended without a result"),
                _ => {}
            }
        }

        let total = self.order.len();
        let completed = self
            .states
            .values()
            .filter(|s| s.status == NodeStatus::Completed)
            .count();
        let status = if completed == total {
            RunStatus::Success
        } else if cancelled {
            RunStatus::Cancelled
        } else if completed > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        };
        let level = match status {
            RunStatus::Success => LogLevel::Info,
            _ => LogLevel::Warn,
        };
        self.log(
            level,
            None,
            format!("run finished: {status} ({completed}/{total} nodes completed)"),
        );

        let node_states: BTreeMap<String, NodeStatus> = self
            .states
            .iter()
            .map(|(id, s)| (id.clone(), s.status))
            .collect();

        ExecutionResult {
            execution_id: self.ctx.execution_id.clone(),
            workflow_name: self.ctx.workflow_name.clone(),
            status,
            results: self.results,
            errors: self.errors,
            logs: self.logs,
            node_states,
            started_at: self.started_at,
            completed_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// DagExecutor
// ---------------------------------------------------------------------------

/// Wave-based DAG executor.
///
/// Generic over `I: ToolInvoker` so the engine never knows how tool calls
/// travel. Holds the cancellation tokens of every run in progress.
pub struct DagExecutor<I: ToolInvoker> {
    invoker: Arc<I>,
    config: EngineConfig,
    /// Cancellation tokens keyed by execution id.
    cancellation_tokens: DashMap<String, CancellationToken>,
}

/// Undoes a run's registrations even if its future is dropped mid-flight.
struct RunGuard<'a, I: ToolInvoker> {
    executor: &'a DagExecutor<I>,
    execution_id: &'a str,
    servers: Vec<String>,
}

impl<I: ToolInvoker> Drop for RunGuard<'_, I> {
    fn drop(&mut self) {
        self.executor.invoker.release(&self.servers);
        self.executor.cancellation_tokens.remove(self.execution_id);
    }
}

impl<I: ToolInvoker> DagExecutor<I> {
    pub fn new(invoker: Arc<I>, config: EngineConfig) -> Self {
        Self {
            invoker,
            config,
            cancellation_tokens: DashMap::new(),
        }
    }

    pub fn invoker(&self) -> &Arc<I> {
        &self.invoker
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self, execution_id: &str) -> bool {
        self.cancellation_tokens.contains_key(execution_id)
    }

    /// Request cooperative cancellation of a run in progress.
    pub fn cancel(&self, execution_id: &str) -> Result<(), ExecutorError> {
        let token = self
            .cancellation_tokens
            .get(execution_id)
            .ok_or_else(|| ExecutorError::RunNotFound(execution_id.to_string()))?;
        token.cancel();
        info!(execution_id, "workflow run cancellation requested");
        Ok(())
    }

    /// Register `execution_id` so it can be cancelled before its run starts.
    ///
    /// The returned token must be handed to `execute_reserved`, which drops
    /// the registration when the run ends.
    pub fn reserve(&self, execution_id: &str) -> Result<CancellationToken, ExecutorError> {
        match self.cancellation_tokens.entry(execution_id.to_string()) {
            Entry::Occupied(_) => Err(ExecutorError::AlreadyRunning(execution_id.to_string())),
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                slot.insert(token.clone());
                Ok(token)
            }
        }
    }

    /// Run `definition` to completion.
    ///
    /// Returns `Err` only when the run could not start; every node-level
    /// failure is reported inside the `ExecutionResult`.
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        params: Map<String, Value>,
        execution_id: &str,
        sink: &dyn ProgressSink,
    ) -> Result<ExecutionResult, ExecutorError> {
        let token = match self.reserve(execution_id) {
            Ok(token) => token,
            Err(e) => {
                sink.emit(ProgressEvent::Error {
                    error: e.to_string(),
                });
                return Err(e);
            }
        };
        self.execute_reserved(definition, params, execution_id, token, sink)
            .await
    }

    /// Run `definition` under a token obtained from `reserve`.
    ///
    /// A cancellation requested before this call is honoured at the first
    /// wave check, leaving every node skipped.
    pub async fn execute_reserved(
        &self,
        definition: &WorkflowDefinition,
        params: Map<String, Value>,
        execution_id: &str,
        token: CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<ExecutionResult, ExecutorError> {
        let mut guard = RunGuard {
            executor: self,
            execution_id,
            servers: Vec::new(),
        };

        let waves = match validate_definition(definition)
            .and_then(|()| build_execution_plan(definition))
        {
            Ok(waves) => waves,
            Err(e) => {
                warn!(execution_id, workflow = %definition.name, error = %e, "workflow rejected");
                sink.emit(ProgressEvent::Error {
                    error: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let servers = definition.servers();
        self.invoker.retain(&servers);
        guard.servers = servers;

        info!(
            execution_id,
            workflow = %definition.name,
            nodes = definition.nodes.len(),
            waves = waves.len(),
            "workflow run started"
        );
        let mut run = RunRecorder::new(definition, execution_id, params, sink);
        run.log(
            LogLevel::Info,
            None,
            format!(
                "run started: workflow '{}' with {} nodes in {} waves",
                definition.name,
                definition.nodes.len(),
                waves.len()
            ),
        );

        self.execute_waves(definition, &waves, &mut run, &token).await;
        drop(guard);

        let result = run.finish(token.is_cancelled());
        info!(
            execution_id,
            status = %result.status,
            errors = result.errors.len(),
            duration_ms = result.duration_ms(),
            "workflow run finished"
        );
        sink.emit(ProgressEvent::Complete {
            result: Box::new(result.clone()),
        });
        Ok(result)
    }

    async fn execute_waves(
        &self,
        definition: &WorkflowDefinition,
        waves: &[Vec<&WorkflowNode>],
        run: &mut RunRecorder<'_>,
        token: &CancellationToken,
    ) {
        let deps = dependency_map(definition);
        let limit = Arc::new(Semaphore::new(self.config.max_parallel_nodes.max(1)));

        for (wave_idx, wave) in waves.iter().enumerate() {
            if token.is_cancelled() {
                run.log(LogLevel::Warn, None, "run cancelled");
                break;
            }
            debug!(
                execution_id = %run.ctx.execution_id,
                wave = wave_idx,
                nodes = wave.len(),
                "processing wave"
            );

            let mut join_set = JoinSet::new();
            let mut launched: Vec<&WorkflowNode> = Vec::new();

            for &node in wave {
                let blocked = deps.get(node.id.as_str()).and_then(|ds| {
                    ds.iter()
                        .find(|d| run.status(d) != NodeStatus::Completed)
                        .copied()
                });
                if let Some(dep) = blocked {
                    run.skip(&node.id, &format!("dependency '{dep}' did not complete"));
                    continue;
                }
                if token.is_cancelled() {
                    break;
                }

                let permit = tokio::select! {
                    permit = Arc::clone(&limit).acquire_owned() => permit,
                    () = token.cancelled() => break,
                };
                let Ok(permit) = permit else {
                    break;
                };

                run.start(node);
                let arguments = match run.ctx.resolve(&node.params) {
                    Ok(arguments) => arguments,
                    Err(e) => {
                        run.fail(&node.id, &e.to_string());
                        continue;
                    }
                };

                let invoker = Arc::clone(&self.invoker);
                let server = node.server.clone();
                let tool = node.tool.clone();
                let timeout = Duration::from_secs(
                    node.timeout_secs
                        .unwrap_or(self.config.default_timeout_secs),
                );
                let call_token = token.clone();
                let slot = launched.len();
                launched.push(node);

                join_set.spawn(async move {
                    let _permit = permit;
                    let outcome = invoker
                        .call_tool(&server, &tool, arguments, timeout, call_token)
                        .await;
                    (slot, outcome)
                });
            }

            let mut outcomes: Vec<Option<Result<Value, InvokeError>>> =
                (0..launched.len()).map(|_| None).collect();
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((slot, outcome)) => outcomes[slot] = Some(outcome),
                    Err(e) => warn!(error = %e, "tool call task failed"),
                }
            }

            for (node, outcome) in launched.into_iter().zip(outcomes) {
                match outcome {
                    Some(Ok(value)) => run.complete(&node.id, value),
                    Some(Err(InvokeError::Cancelled)) => {
                        run.skip(&node.id, "run cancelled while the call was in flight");
                    }
                    Some(Err(e)) => run.fail(&node.id, &e.to_string()),
                    None => run.fail(&node.id, "tool call task aborted"),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
