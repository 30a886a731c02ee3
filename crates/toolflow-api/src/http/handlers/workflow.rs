//! Workflow definition handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;

use toolflow_core::repository::WorkflowRepository;
use toolflow_types::workflow::StoredWorkflow;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// One row of the workflow listing.
#[derive(Debug, Serialize)]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: usize,
    pub servers: Vec<String>,
}

impl From<&StoredWorkflow> for WorkflowSummary {
    fn from(stored: &StoredWorkflow) -> Self {
        Self {
            id: stored.id.clone(),
            name: stored.definition.name.clone(),
            description: stored.definition.description.clone(),
            nodes: stored.definition.nodes.len(),
            servers: stored.definition.servers(),
        }
    }
}

/// GET /api/v1/workflows - List stored workflows.
pub async fn list_workflows(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<WorkflowSummary>>>, AppError> {
    let start = Instant::now();
    let workflows = state.run_service.repository().list().await?;
    let summaries = workflows.iter().map(WorkflowSummary::from).collect();
    Ok(Json(ApiResponse::success(summaries, start)))
}

/// GET /api/v1/workflows/{id} - Full definition of one workflow.
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<StoredWorkflow>>, AppError> {
    let start = Instant::now();
    let stored = state.run_service.repository().get(&id).await?;
    Ok(Json(ApiResponse::success(stored, start)))
}
