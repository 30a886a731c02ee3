//! Run handlers: start, inspect and cancel workflow executions.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use toolflow_core::service::RunState;
use toolflow_types::run::ExecutionResult;
use toolflow_types::workflow::InvocationRequest;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RunAccepted {
    pub execution_id: String,
}

/// Snapshot of a run: either still going or its final result.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RunView {
    Running {
        execution_id: String,
        workflow_name: String,
        status: &'static str,
    },
    Finished(Box<ExecutionResult>),
}

impl RunView {
    fn new(execution_id: String, state: RunState) -> Self {
        match state {
            RunState::Running { workflow_name } => RunView::Running {
                execution_id,
                workflow_name,
                status: "running",
            },
            RunState::Finished(result) => RunView::Finished(result),
        }
    }
}

/// POST /api/v1/runs - Start a workflow run in the background.
pub async fn start_run(
    State(state): State<AppState>,
    Json(request): Json<InvocationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let start = Instant::now();
    let execution_id = state.run_service.start(request).await?;
    let links = (
        format!("/api/v1/runs/{execution_id}"),
        format!("/api/v1/runs/{execution_id}/stream"),
    );
    let response = ApiResponse::success(RunAccepted { execution_id }, start)
        .with_link("self", &links.0)
        .with_link("stream", &links.1);
    Ok((StatusCode::ACCEPTED, response))
}

/// GET /api/v1/runs/{id} - Current state or final result of a run.
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<RunView>>, AppError> {
    let start = Instant::now();
    let run_state = state
        .run_service
        .state(&id)
        .ok_or_else(|| AppError::NotFound(format!("Execution '{id}' not found")))?;
    Ok(Json(ApiResponse::success(RunView::new(id, run_state), start)))
}

/// POST /api/v1/runs/{id}/cancel - Request cooperative cancellation.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    state.run_service.cancel(&id)?;
    tracing::info!(execution_id = %id, "run cancellation requested via API");
    Ok(Json(ApiResponse::success(
        serde_json::json!({ "execution_id": id, "cancelling": true }),
        start,
    )))
}
