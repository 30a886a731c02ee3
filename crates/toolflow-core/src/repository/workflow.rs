//! Workflow repository trait definition.

use toolflow_types::error::RepositoryError;
use toolflow_types::workflow::StoredWorkflow;

/// Read access to named workflow definitions.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync + 'static {
    /// Get a stored workflow by id. Unknown ids yield `RepositoryError::NotFound`.
    fn get(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<StoredWorkflow, RepositoryError>> + Send;

    /// List every stored workflow, ordered by id.
    fn list(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<StoredWorkflow>, RepositoryError>> + Send;
}
