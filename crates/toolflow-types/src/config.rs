//! Configuration types for toolflow.
//!
//! `ToolflowConfig` mirrors `config.toml`: engine limits, the client identity
//! announced during handshakes, the tool-server table, and the HTTP listener.
//! Every field has a default so an empty file is a valid configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::protocol::PROTOCOL_VERSION;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolflowConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub client: ClientConfig,
    /// Tool servers keyed by the id workflow nodes use in `server`.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
    #[serde(default)]
    pub server: HttpConfig,
    /// Directory of `*.json` workflow definitions served by id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflows_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Call timeout for nodes that do not set `timeout_secs`.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Maximum tool calls in flight per run. 1 runs nodes strictly one at a time.
    #[serde(default = "default_max_parallel_nodes")]
    pub max_parallel_nodes: usize,
    /// Capacity of the progress event broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_parallel_nodes() -> usize {
    4
}

fn default_event_buffer() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            max_parallel_nodes: default_max_parallel_nodes(),
            event_buffer: default_event_buffer(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client identity
// ---------------------------------------------------------------------------

/// What toolflow announces about itself in `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_name")]
    pub name: String,
    #[serde(default = "default_client_version")]
    pub version: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
}

fn default_client_name() -> String {
    "toolflow".to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_protocol_version() -> String {
    PROTOCOL_VERSION.to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            version: default_client_version(),
            protocol_version: default_protocol_version(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool servers
// ---------------------------------------------------------------------------

/// How to reach one tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ServerConfig {
    /// Child process speaking newline-delimited JSON on stdin/stdout.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// Streamable HTTP endpoint.
    Http {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

impl ServerConfig {
    pub fn transport_name(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http { .. } => "http",
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP listener
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3717
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = ToolflowConfig::default();
        assert_eq!(config.engine.default_timeout_secs, 300);
        assert_eq!(config.engine.max_parallel_nodes, 4);
        assert_eq!(config.engine.event_buffer, 1024);
        assert_eq!(config.client.name, "toolflow");
        assert_eq!(config.client.protocol_version, "2025-11-25");
        assert!(config.servers.is_empty());
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_config_deserialize_empty() {
        let config: ToolflowConfig = toml::from_str("").unwrap();
        assert_eq!(config, ToolflowConfig::default());
    }

    #[test]
    fn test_config_deserialize_with_servers() {
        let toml_str = r#"
workflows_dir = "/srv/workflows"

[engine]
max_parallel_nodes = 1

[servers.nmap]
transport = "stdio"
command = "nmap-mcp"
args = ["--quiet"]

[servers.llm]
transport = "http"
url = "http://127.0.0.1:9000/mcp"

[servers.llm.headers]
Authorization = "Bearer abc"
"#;
        let config: ToolflowConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.max_parallel_nodes, 1);
        assert_eq!(config.engine.default_timeout_secs, 300);
        assert_eq!(config.servers.len(), 2);
        match &config.servers["nmap"] {
            ServerConfig::Stdio { command, args, env } => {
                assert_eq!(command, "nmap-mcp");
                assert_eq!(args, &vec!["--quiet".to_string()]);
                assert!(env.is_empty());
            }
            other => panic!("expected stdio, got {other:?}"),
        }
        assert_eq!(config.servers["llm"].transport_name(), "http");
        assert_eq!(config.workflows_dir, Some(PathBuf::from("/srv/workflows")));
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let result: Result<ToolflowConfig, _> =
            toml::from_str("[servers.x]\ntransport = \"carrier-pigeon\"\n");
        assert!(result.is_err());
    }
}
