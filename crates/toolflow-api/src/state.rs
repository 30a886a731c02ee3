//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both CLI and REST
//! API. Services are generic over the core ports; AppState pins them to the
//! concrete infra implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use toolflow_core::event::EventBus;
use toolflow_core::protocol::SessionManager;
use toolflow_core::service::RunService;
use toolflow_core::workflow::DagExecutor;
use toolflow_infra::config::{load_config, resolve_data_dir};
use toolflow_infra::repository::MemoryWorkflowRepository;
use toolflow_infra::transport::TransportConnector;
use toolflow_types::config::ToolflowConfig;

/// Concrete type aliases for the service generics pinned to infra implementations.
pub type ConcreteSessionManager = SessionManager<TransportConnector>;

pub type ConcreteRunService = RunService<ConcreteSessionManager, MemoryWorkflowRepository>;

/// Shared application state holding all services.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ToolflowConfig>,
    pub sessions: Arc<ConcreteSessionManager>,
    pub run_service: Arc<ConcreteRunService>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Load configuration and wire services.
    pub async fn init(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        let config = load_config(config_path, &data_dir).await?;
        Self::from_config(config, data_dir).await
    }

    /// Wire services from an already loaded configuration.
    ///
    /// Workflows are imported from `workflows_dir`, defaulting to
    /// `{data_dir}/workflows` when that directory exists.
    pub async fn from_config(config: ToolflowConfig, data_dir: PathBuf) -> anyhow::Result<Self> {
        let repository = MemoryWorkflowRepository::new();
        let workflows_dir = config
            .workflows_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("workflows"));
        if tokio::fs::try_exists(&workflows_dir).await.unwrap_or(false) {
            repository.load_dir(&workflows_dir).await?;
        }

        let sessions = Arc::new(SessionManager::new(
            TransportConnector::new(),
            config.servers.clone(),
            config.client.clone(),
        ));
        let executor = DagExecutor::new(Arc::clone(&sessions), config.engine.clone());
        let bus = EventBus::new(config.engine.event_buffer);
        let run_service = RunService::new(Arc::new(executor), Arc::new(repository), bus);

        tracing::debug!(
            servers = config.servers.len(),
            data_dir = %data_dir.display(),
            "application state ready"
        );

        Ok(Self {
            config: Arc::new(config),
            sessions,
            run_service: Arc::new(run_service),
            data_dir,
        })
    }
}
