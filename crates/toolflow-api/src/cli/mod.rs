//! CLI command definitions for the `toolflow` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod run;
pub mod tools;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use serde_json::{Map, Value};
use toolflow_core::workflow::{WorkflowError, parse_definition};
use toolflow_types::workflow::WorkflowDefinition;

/// Run workflows of tool calls across tool servers.
#[derive(Parser)]
#[command(name = "toolflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (defaults to {data_dir}/config.toml).
    #[arg(long, global = true, env = "TOOLFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow definition file and stream its progress.
    Run {
        /// Path to the workflow JSON file.
        file: PathBuf,

        /// Initial parameter as key=value (repeatable). Values that parse as
        /// JSON are passed as JSON, anything else as a string.
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// Check a workflow definition without running it.
    Validate {
        /// Path to the workflow JSON file.
        file: PathBuf,
    },

    /// Connect to a configured tool server and list its tools.
    Tools {
        /// Server id from the [servers] table.
        server: String,
    },

    /// Start the REST API server.
    Serve {
        /// Port to listen on (defaults to [server].port).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (defaults to [server].host).
        #[arg(long)]
        host: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Read and parse a workflow definition file.
pub async fn load_definition(file: &Path) -> Result<WorkflowDefinition> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    parse_definition(&content).map_err(|e| match e {
        WorkflowError::Parse(msg) => anyhow::anyhow!("Failed to parse workflow JSON: {msg}"),
        WorkflowError::Invalid(err) => anyhow::anyhow!("Workflow validation failed: {err}"),
    })
}

/// Turn `key=value` arguments into the initial parameter map.
pub fn parse_params(raw: &[String]) -> Result<Map<String, Value>> {
    let mut params = Map::new();
    for item in raw {
        let Some((key, value)) = item.split_once('=') else {
            bail!("Invalid parameter '{item}': expected KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid parameter '{item}': empty key");
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_arguments_parse() {
        let cli = Cli::try_parse_from([
            "toolflow", "-vv", "run", "recon.json", "-p", "target=10.0.0.1", "--param", "ports=[22]",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run { file, params } => {
                assert_eq!(file, PathBuf::from("recon.json"));
                assert_eq!(params, vec!["target=10.0.0.1", "ports=[22]"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn params_keep_json_values() {
        let params = parse_params(&[
            "target=10.0.0.1".to_string(),
            "ports=[22, 80]".to_string(),
            "deep=true".to_string(),
            "note=a=b".to_string(),
        ])
        .unwrap();
        assert_eq!(params["target"], "10.0.0.1");
        assert_eq!(params["ports"], json!([22, 80]));
        assert_eq!(params["deep"], true);
        assert_eq!(params["note"], "a=b");
    }

    #[test]
    fn params_need_a_key() {
        assert!(parse_params(&["novalue".to_string()]).is_err());
        assert!(parse_params(&["=5".to_string()]).is_err());
    }

    #[tokio::test]
    async fn load_definition_reports_validation() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        tokio::fs::write(&path, r#"{"name": "w", "nodes": []}"#).await.unwrap();
        let err = load_definition(&path).await.unwrap_err();
        assert!(err.to_string().contains("validation failed"));

        let missing = tmp.path().join("missing.json");
        assert!(load_definition(&missing).await.is_err());
    }
}
