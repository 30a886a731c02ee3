//! Run service: turns invocation requests into workflow runs.
//!
//! Resolves the requested workflow (inline or from the repository), assigns
//! the execution id, and drives the `DagExecutor` with progress published on
//! the shared `EventBus`. Finished results stay in memory for lookup.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use toolflow_types::error::RepositoryError;
use toolflow_types::event::RunEvent;
use toolflow_types::run::ExecutionResult;
use toolflow_types::workflow::{InvocationRequest, WorkflowDefinition, WorkflowSource};
use tracing::{info, warn};
use uuid::Uuid;

use crate::event::EventBus;
use crate::protocol::ToolInvoker;
use crate::repository::WorkflowRepository;
use crate::workflow::definition::{ValidationError, validate_definition};
use crate::workflow::executor::{DagExecutor, ExecutorError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("invalid workflow: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("execution id '{0}' is already in use")]
    DuplicateExecution(String),
}

/// What the service knows about an execution id.
#[derive(Debug, Clone)]
pub enum RunState {
    Running { workflow_name: String },
    Finished(Box<ExecutionResult>),
}

/// A request resolved to a concrete definition and a reserved id.
struct PreparedRun {
    execution_id: String,
    definition: WorkflowDefinition,
    params: Map<String, Value>,
    token: CancellationToken,
}

/// Service running workflows on behalf of the CLI and the HTTP surface.
///
/// Generic over the invoker and repository ports so it never depends on
/// toolflow-infra.
pub struct RunService<I: ToolInvoker, R: WorkflowRepository> {
    executor: Arc<DagExecutor<I>>,
    repository: Arc<R>,
    bus: EventBus,
    runs: DashMap<String, RunState>,
}

impl<I: ToolInvoker, R: WorkflowRepository> RunService<I, R> {
    pub fn new(executor: Arc<DagExecutor<I>>, repository: Arc<R>, bus: EventBus) -> Self {
        Self {
            executor,
            repository,
            bus,
            runs: DashMap::new(),
        }
    }

    pub fn executor(&self) -> &Arc<DagExecutor<I>> {
        &self.executor
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Receive progress events of every run started after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.bus.subscribe()
    }

    pub fn state(&self, execution_id: &str) -> Option<RunState> {
        self.runs.get(execution_id).map(|entry| entry.value().clone())
    }

    pub fn result(&self, execution_id: &str) -> Option<ExecutionResult> {
        match self.state(execution_id)? {
            RunState::Finished(result) => Some(*result),
            RunState::Running { .. } => None,
        }
    }

    /// Request cooperative cancellation of a running execution.
    ///
    /// Works from the moment `start` returns: a run cancelled before its
    /// first wave ends `cancelled` with every node skipped.
    pub fn cancel(&self, execution_id: &str) -> Result<(), ServiceError> {
        self.executor.cancel(execution_id)?;
        Ok(())
    }

    /// Run a workflow to completion and return its result.
    pub async fn invoke(&self, request: InvocationRequest) -> Result<ExecutionResult, ServiceError> {
        let run = self.prepare(request).await?;
        self.run_prepared(run).await
    }

    /// Start a workflow in the background and return its execution id.
    ///
    /// Validation and lookup failures are reported here; everything after
    /// that is observable through `subscribe` and `state`.
    pub async fn start(self: &Arc<Self>, request: InvocationRequest) -> Result<String, ServiceError> {
        let run = self.prepare(request).await?;
        let execution_id = run.execution_id.clone();
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let id = run.execution_id.clone();
            if let Err(e) = service.run_prepared(run).await {
                warn!(execution_id = %id, error = %e, "background run failed to start");
            }
        });
        Ok(execution_id)
    }

    async fn prepare(&self, request: InvocationRequest) -> Result<PreparedRun, ServiceError> {
        let definition = match request.workflow {
            WorkflowSource::Inline(definition) => definition,
            WorkflowSource::Reference { workflow_id } => {
                self.repository.get(&workflow_id).await?.definition
            }
        };
        validate_definition(&definition)?;

        let execution_id = request
            .execution_id
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        match self.runs.entry(execution_id.clone()) {
            Entry::Occupied(_) => return Err(ServiceError::DuplicateExecution(execution_id)),
            Entry::Vacant(slot) => {
                slot.insert(RunState::Running {
                    workflow_name: definition.name.clone(),
                });
            }
        }
        let token = match self.executor.reserve(&execution_id) {
            Ok(token) => token,
            Err(e) => {
                self.runs.remove(&execution_id);
                return Err(e.into());
            }
        };

        info!(execution_id = %execution_id, workflow = %definition.name, "run accepted");
        Ok(PreparedRun {
            execution_id,
            definition,
            params: request.params,
            token,
        })
    }

    async fn run_prepared(&self, run: PreparedRun) -> Result<ExecutionResult, ServiceError> {
        let sink = self.bus.sink(run.execution_id.clone());
        let outcome = self
            .executor
            .execute_reserved(
                &run.definition,
                run.params,
                &run.execution_id,
                run.token,
                &sink,
            )
            .await;
        match outcome {
            Ok(result) => {
                self.runs.insert(
                    run.execution_id,
                    RunState::Finished(Box::new(result.clone())),
                );
                Ok(result)
            }
            Err(e) => {
                self.runs.remove(&run.execution_id);
                Err(e.into())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use toolflow_types::config::EngineConfig;
    use toolflow_types::event::ProgressEvent;
    use toolflow_types::run::RunStatus;
    use toolflow_types::workflow::{StoredWorkflow, WorkflowEdge, WorkflowNode};

    use super::*;
    use crate::protocol::InvokeError;

    /// Echoes arguments back; the tool `wait` blocks until cancelled.
    struct EchoInvoker;

    impl ToolInvoker for EchoInvoker {
        async fn call_tool(
            &self,
            _server: &str,
            tool: &str,
            arguments: Map<String, Value>,
            _timeout: Duration,
            cancel: CancellationToken,
        ) -> Result<Value, InvokeError> {
            if tool == "wait" {
                cancel.cancelled().await;
                return Err(InvokeError::Cancelled);
            }
            Ok(Value::Object(arguments))
        }

        fn retain(&self, _servers: &[String]) {}

        fn release(&self, _servers: &[String]) {}
    }

    #[derive(Default)]
    struct FixedRepository {
        workflows: BTreeMap<String, WorkflowDefinition>,
    }

    impl WorkflowRepository for FixedRepository {
        async fn get(&self, id: &str) -> Result<StoredWorkflow, RepositoryError> {
            self.workflows
                .get(id)
                .map(|definition| StoredWorkflow {
                    id: id.to_string(),
                    definition: definition.clone(),
                })
                .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
        }

        async fn list(&self) -> Result<Vec<StoredWorkflow>, RepositoryError> {
            Ok(self
                .workflows
                .iter()
                .map(|(id, definition)| StoredWorkflow {
                    id: id.clone(),
                    definition: definition.clone(),
                })
                .collect())
        }
    }

    fn greet() -> WorkflowDefinition {
        WorkflowDefinition {
            name: "greet".to_string(),
            description: None,
            nodes: vec![
                WorkflowNode::tool("hello", "echo", "say")
                    .with_params(json!({"who": "${params.who}"})),
                WorkflowNode::tool("again", "echo", "say")
                    .with_params(json!({"said": "${hello.who}"})),
            ],
            edges: vec![WorkflowEdge::new("hello", "again")],
        }
    }

    fn service() -> Arc<RunService<EchoInvoker, FixedRepository>> {
        let mut repo = FixedRepository::default();
        repo.workflows.insert("greet".to_string(), greet());
        let executor = DagExecutor::new(Arc::new(EchoInvoker), EngineConfig::default());
        Arc::new(RunService::new(
            Arc::new(executor),
            Arc::new(repo),
            EventBus::new(64),
        ))
    }

    fn request(workflow: WorkflowSource, execution_id: Option<&str>) -> InvocationRequest {
        let mut params = Map::new();
        params.insert("who".to_string(), json!("ada"));
        InvocationRequest {
            workflow,
            params,
            execution_id: execution_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn invoke_inline_workflow() {
        let svc = service();
        let result = svc
            .invoke(request(WorkflowSource::Inline(greet()), Some("run-1")))
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.results["again"], json!({"said": "ada"}));
        assert!(matches!(svc.state("run-1"), Some(RunState::Finished(_))));
        assert_eq!(svc.result("run-1").unwrap().execution_id, "run-1");
    }

    #[tokio::test]
    async fn invoke_by_reference() {
        let svc = service();
        let result = svc
            .invoke(request(
                WorkflowSource::Reference {
                    workflow_id: "greet".to_string(),
                },
                None,
            ))
            .await
            .unwrap();
        assert_eq!(result.workflow_name, "greet");

        let id = Uuid::parse_str(&result.execution_id).unwrap();
        assert_eq!(id.get_version_num(), 7);
    }

    #[tokio::test]
    async fn unknown_reference_is_not_found() {
        let svc = service();
        let err = svc
            .invoke(request(
                WorkflowSource::Reference {
                    workflow_id: "nope".to_string(),
                },
                Some("run-1"),
            ))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Repository(RepositoryError::NotFound(_))
        ));
        assert!(svc.state("run-1").is_none());
    }

    #[tokio::test]
    async fn invalid_inline_workflow_is_rejected_before_running() {
        let svc = service();
        let mut def = greet();
        def.edges.push(WorkflowEdge::new("again", "hello"));

        let err = svc
            .invoke(request(WorkflowSource::Inline(def), Some("run-1")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Validation(ValidationError::CycleDetected(_))
        ));
        assert!(svc.state("run-1").is_none());
    }

    #[tokio::test]
    async fn execution_ids_are_unique() {
        let svc = service();
        svc.invoke(request(WorkflowSource::Inline(greet()), Some("run-1")))
            .await
            .unwrap();
        let err = svc
            .invoke(request(WorkflowSource::Inline(greet()), Some("run-1")))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateExecution(id) if id == "run-1"));
    }

    #[tokio::test]
    async fn started_run_streams_to_subscribers() {
        let svc = service();
        let mut rx = svc.subscribe();

        let id = svc
            .start(request(WorkflowSource::Inline(greet()), None))
            .await
            .unwrap();

        let result = loop {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.execution_id, id);
            if let ProgressEvent::Complete { result } = event.event {
                break result;
            }
        };
        assert_eq!(result.status, RunStatus::Success);

        // The stored result lands right after the terminal event.
        for _ in 0..100 {
            if svc.result(&id).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(svc.result(&id).unwrap().status, RunStatus::Success);
    }

    #[tokio::test]
    async fn cancel_running_workflow() {
        let svc = service();
        let mut def = greet();
        def.nodes[1].tool = "wait".to_string();
        let mut rx = svc.subscribe();

        let id = svc
            .start(request(WorkflowSource::Inline(def), Some("run-1")))
            .await
            .unwrap();
        assert!(matches!(svc.state(&id), Some(RunState::Running { .. })));

        // Wait for the blocking node to start before cancelling.
        loop {
            let event = rx.recv().await.unwrap();
            if let ProgressEvent::NodeState { node_id, status } = &event.event {
                if node_id == "again" && *status == toolflow_types::run::NodeStatus::Running {
                    break;
                }
            }
        }
        svc.cancel(&id).unwrap();

        let result = loop {
            if let ProgressEvent::Complete { result } = rx.recv().await.unwrap().event {
                break result;
            }
        };
        assert_eq!(result.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_right_after_start_is_honoured() {
        let svc = service();
        let mut def = greet();
        def.nodes[1].tool = "wait".to_string();
        let mut rx = svc.subscribe();

        let id = svc
            .start(request(WorkflowSource::Inline(def), Some("run-1")))
            .await
            .unwrap();
        assert!(matches!(svc.state(&id), Some(RunState::Running { .. })));
        svc.cancel(&id).unwrap();

        let result = loop {
            if let ProgressEvent::Complete { result } = rx.recv().await.unwrap().event {
                break result;
            }
        };
        assert_eq!(result.status, RunStatus::Cancelled);
        assert!(
            result
                .node_states
                .values()
                .all(|s| *s == toolflow_types::run::NodeStatus::Skipped)
        );
    }

    #[tokio::test]
    async fn cancel_unknown_execution() {
        let svc = service();
        assert!(matches!(
            svc.cancel("ghost"),
            Err(ServiceError::Executor(ExecutorError::RunNotFound(_)))
        ));
    }
}
