//! In-memory workflow repository.
//!
//! Definitions live in a `DashMap` keyed by id. [`MemoryWorkflowRepository::load_dir`]
//! imports every `*.json` file of a directory, using the file stem as id.

use std::path::Path;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use toolflow_core::repository::WorkflowRepository;
use toolflow_core::workflow::{parse_definition, validate_definition};
use toolflow_types::error::RepositoryError;
use toolflow_types::workflow::{StoredWorkflow, WorkflowDefinition};

#[derive(Debug, Default)]
pub struct MemoryWorkflowRepository {
    workflows: DashMap<String, WorkflowDefinition>,
}

impl MemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a definition under `id`. Ids are unique.
    pub fn insert(
        &self,
        id: impl Into<String>,
        definition: WorkflowDefinition,
    ) -> Result<(), RepositoryError> {
        match self.workflows.entry(id.into()) {
            Entry::Occupied(slot) => Err(RepositoryError::Conflict(format!(
                "workflow '{}' already exists",
                slot.key()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(definition);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Import every `*.json` definition in `dir`, in file name order.
    ///
    /// Files that do not parse or validate abort the import. Returns the
    /// number of workflows added.
    pub async fn load_dir(&self, dir: &Path) -> Result<usize, RepositoryError> {
        let load_error = |path: &Path, reason: String| RepositoryError::Load {
            path: path.display().to_string(),
            reason,
        };

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| load_error(dir, e.to_string()))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| load_error(dir, e.to_string()))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();

        let mut loaded = 0;
        for path in files {
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                tracing::warn!(path = %path.display(), "skipping workflow file with a non UTF-8 name");
                continue;
            };
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| load_error(&path, e.to_string()))?;
            let definition =
                parse_definition(&content).map_err(|e| load_error(&path, e.to_string()))?;
            validate_definition(&definition).map_err(|e| load_error(&path, e.to_string()))?;

            tracing::debug!(id = %id, workflow = %definition.name, "loaded workflow");
            self.insert(id, definition)?;
            loaded += 1;
        }

        tracing::info!(dir = %dir.display(), count = loaded, "workflows loaded");
        Ok(loaded)
    }
}

impl WorkflowRepository for MemoryWorkflowRepository {
    async fn get(&self, id: &str) -> Result<StoredWorkflow, RepositoryError> {
        self.workflows
            .get(id)
            .map(|entry| StoredWorkflow {
                id: id.to_string(),
                definition: entry.value().clone(),
            })
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<StoredWorkflow>, RepositoryError> {
        let mut all: Vec<StoredWorkflow> = self
            .workflows
            .iter()
            .map(|entry| StoredWorkflow {
                id: entry.key().clone(),
                definition: entry.value().clone(),
            })
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use toolflow_types::workflow::WorkflowNode;

    fn single(name: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            name: name.to_string(),
            description: None,
            nodes: vec![WorkflowNode::tool("a", "srv", "t")],
            edges: vec![],
        }
    }

    const RECON: &str = r#"{
        "name": "recon",
        "nodes": [
            {"id": "scan", "server": "nmap", "tool": "scan", "params": {"target": "${params.target}"}},
            {"id": "report", "server": "fs", "tool": "write", "params": {"body": "${scan}"}}
        ],
        "edges": [{"source": "scan", "target": "report"}]
    }"#;

    #[tokio::test]
    async fn get_and_list() {
        let repo = MemoryWorkflowRepository::new();
        repo.insert("b", single("second")).unwrap();
        repo.insert("a", single("first")).unwrap();

        assert_eq!(repo.get("a").await.unwrap().definition.name, "first");
        let ids: Vec<String> = repo.list().await.unwrap().into_iter().map(|w| w.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let repo = MemoryWorkflowRepository::new();
        let err = repo.get("missing").await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(id) if id == "missing"));
    }

    #[test]
    fn duplicate_insert_conflicts() {
        let repo = MemoryWorkflowRepository::new();
        repo.insert("a", single("first")).unwrap();
        let err = repo.insert("a", single("again")).unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn load_dir_imports_json_files() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("recon.json"), RECON).await.unwrap();
        tokio::fs::write(tmp.path().join("notes.txt"), "ignored").await.unwrap();

        let repo = MemoryWorkflowRepository::new();
        let loaded = repo.load_dir(tmp.path()).await.unwrap();

        assert_eq!(loaded, 1);
        let stored = repo.get("recon").await.unwrap();
        assert_eq!(stored.definition.nodes.len(), 2);
    }

    #[tokio::test]
    async fn load_dir_rejects_invalid_definitions() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("loop.json"),
            r#"{"name": "loop", "nodes": [{"id": "a", "server": "s", "tool": "t"}],
                "edges": [{"source": "a", "target": "a"}]}"#,
        )
        .await
        .unwrap();

        let repo = MemoryWorkflowRepository::new();
        let err = repo.load_dir(tmp.path()).await.unwrap_err();
        match err {
            RepositoryError::Load { path, reason } => {
                assert!(path.ends_with("loop.json"));
                assert!(reason.contains("depends on itself"));
            }
            other => panic!("expected load error, got {other:?}"),
        }
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn load_dir_missing_directory_fails() {
        let tmp = TempDir::new().unwrap();
        let repo = MemoryWorkflowRepository::new();
        let err = repo.load_dir(&tmp.path().join("absent")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Load { .. }));
    }
}
