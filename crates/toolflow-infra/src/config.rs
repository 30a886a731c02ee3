//! Configuration loader for toolflow.
//!
//! Reads `config.toml` either from an explicit path or from the data
//! directory (`~/.toolflow/` by default) and deserializes it into
//! [`ToolflowConfig`].

use std::path::{Path, PathBuf};

use toolflow_types::config::ToolflowConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TOOLFLOW_DATA_DIR";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Resolve the data directory: `$TOOLFLOW_DATA_DIR`, else `~/.toolflow`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".toolflow");
    }

    PathBuf::from(".toolflow")
}

/// Load configuration.
///
/// - With `explicit`, the file must exist and parse; any failure is an error.
/// - Otherwise `{data_dir}/config.toml` is read. A missing file yields the
///   defaults, and a malformed one logs a warning and yields the defaults.
pub async fn load_config(
    explicit: Option<&Path>,
    data_dir: &Path,
) -> Result<ToolflowConfig, ConfigError> {
    if let Some(path) = explicit {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let config = parse_config(&content, path)?;
        tracing::debug!(path = %path.display(), servers = config.servers.len(), "loaded config");
        return Ok(config);
    }

    let config_path = data_dir.join("config.toml");
    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return Ok(ToolflowConfig::default());
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return Ok(ToolflowConfig::default());
        }
    };

    match parse_config(&content, &config_path) {
        Ok(config) => Ok(config),
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            Ok(ToolflowConfig::default())
        }
    }
}

fn parse_config(content: &str, path: &Path) -> Result<ToolflowConfig, ConfigError> {
    toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use toolflow_types::config::ServerConfig;

    const SAMPLE: &str = r#"
workflows_dir = "/srv/workflows"

[engine]
max_parallel_nodes = 2

[servers.nmap]
transport = "stdio"
command = "nmap-mcp"
args = ["--quiet"]

[servers.llm]
transport = "http"
url = "http://127.0.0.1:9000/mcp"
"#;

    #[tokio::test]
    async fn missing_implicit_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(None, tmp.path()).await.unwrap();
        assert_eq!(config, ToolflowConfig::default());
    }

    #[tokio::test]
    async fn implicit_file_is_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), SAMPLE)
            .await
            .unwrap();

        let config = load_config(None, tmp.path()).await.unwrap();
        assert_eq!(config.engine.max_parallel_nodes, 2);
        assert_eq!(config.engine.default_timeout_secs, 300);
        assert_eq!(config.servers.len(), 2);
        assert!(matches!(config.servers["nmap"], ServerConfig::Stdio { .. }));
        assert_eq!(config.workflows_dir, Some(PathBuf::from("/srv/workflows")));
    }

    #[tokio::test]
    async fn malformed_implicit_file_falls_back_to_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_config(None, tmp.path()).await.unwrap();
        assert_eq!(config, ToolflowConfig::default());
    }

    #[tokio::test]
    async fn explicit_file_errors_are_reported() {
        let tmp = TempDir::new().unwrap();

        let missing = tmp.path().join("nope.toml");
        let err = load_config(Some(&missing), tmp.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));

        let bad = tmp.path().join("bad.toml");
        tokio::fs::write(&bad, "[engine]\nmax_parallel_nodes = \"many\"")
            .await
            .unwrap();
        let err = load_config(Some(&bad), tmp.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[tokio::test]
    async fn explicit_file_wins_over_data_dir() {
        let tmp = TempDir::new().unwrap();
        let explicit = tmp.path().join("custom.toml");
        tokio::fs::write(&explicit, SAMPLE).await.unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "")
            .await
            .unwrap();

        let config = load_config(Some(&explicit), tmp.path()).await.unwrap();
        assert_eq!(config.servers.len(), 2);
    }

    #[test]
    fn resolve_data_dir_from_env() {
        // SAFETY: This test is the only one touching TOOLFLOW_DATA_DIR and restores it immediately.
        unsafe {
            std::env::set_var(DATA_DIR_ENV, "/tmp/test-toolflow");
        }
        let dir = resolve_data_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-toolflow"));
        unsafe {
            std::env::remove_var(DATA_DIR_ENV);
        }
    }
}
