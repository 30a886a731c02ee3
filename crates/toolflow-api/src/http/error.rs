//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use toolflow_core::service::ServiceError;
use toolflow_core::workflow::ExecutorError;
use toolflow_types::error::RepositoryError;

use super::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Run service errors.
    Service(ServiceError),
    /// Workflow storage errors.
    Repository(RepositoryError),
    /// Unknown run or resource.
    NotFound(String),
    /// Request rejected before processing.
    Forbidden(String),
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        AppError::Service(e)
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Repository(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Service(ServiceError::Repository(RepositoryError::NotFound(id)))
            | AppError::Repository(RepositoryError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "WORKFLOW_NOT_FOUND",
                format!("Workflow '{id}' not found"),
            ),
            AppError::Service(ServiceError::Validation(e))
            | AppError::Service(ServiceError::Executor(ExecutorError::Validation(e))) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
            }
            AppError::Service(ServiceError::DuplicateExecution(id))
            | AppError::Service(ServiceError::Executor(ExecutorError::AlreadyRunning(id))) => (
                StatusCode::CONFLICT,
                "CONFLICT",
                format!("Execution id '{id}' is already in use"),
            ),
            AppError::Service(ServiceError::Executor(ExecutorError::RunNotFound(id))) => (
                StatusCode::NOT_FOUND,
                "RUN_NOT_FOUND",
                format!("No running execution '{id}'"),
            ),
            AppError::Service(e) => (StatusCode::INTERNAL_SERVER_ERROR, "RUN_ERROR", e.to_string()),
            AppError::Repository(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", e.to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::warn!(code, %message, "request failed");
        }
        (status, ApiResponse::error(code, &message, None)).into_response()
    }
}
