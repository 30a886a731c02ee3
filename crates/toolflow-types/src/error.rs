use thiserror::Error;

/// Errors from workflow definition storage.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("workflow '{0}' not found")]
    NotFound(String),

    #[error("failed to load '{path}': {reason}")]
    Load { path: String, reason: String },

    #[error("conflict: {0}")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::NotFound("recon".to_string());
        assert_eq!(err.to_string(), "workflow 'recon' not found");

        let err = RepositoryError::Load {
            path: "/tmp/x.json".to_string(),
            reason: "expected value".to_string(),
        };
        assert_eq!(err.to_string(), "failed to load '/tmp/x.json': expected value");
    }
}
