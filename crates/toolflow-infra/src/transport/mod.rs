//! Tool-server transports.
//!
//! [`TransportConnector`] implements the core `Connector` port by picking the
//! stdio or HTTP adapter from each server's configuration.

pub mod http;
pub mod stdio;

use toolflow_core::protocol::{Connection, Connector, InvokeError};
use toolflow_types::config::ServerConfig;

/// Buffered messages per direction before senders wait.
pub(crate) const CHANNEL_CAPACITY: usize = 64;

/// Connector for every transport toolflow speaks.
#[derive(Debug, Clone, Default)]
pub struct TransportConnector {
    http: reqwest::Client,
}

impl TransportConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connector for TransportConnector {
    async fn connect(
        &self,
        server_id: &str,
        config: &ServerConfig,
    ) -> Result<Connection, InvokeError> {
        tracing::debug!(server = server_id, transport = config.transport_name(), "opening transport");
        match config {
            ServerConfig::Stdio { command, args, env } => {
                stdio::connect(server_id, command, args, env)
            }
            ServerConfig::Http { url, headers } => {
                http::connect(self.http.clone(), server_id, url, headers)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{Map, json};
    use tokio_util::sync::CancellationToken;
    use toolflow_core::protocol::{SessionManager, ToolInvoker};
    use toolflow_types::config::ClientConfig;

    use super::*;

    /// A minimal tool server in POSIX shell: answers `initialize` and then
    /// echoes every `tools/call` back as text content.
    const SHELL_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-11-25","capabilities":{},"serverInfo":{"name":"sh","version":"1"}}}\n' "$id" ;;
    *'"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id" ;;
  esac
done
"#;

    #[tokio::test]
    async fn session_over_stdio_child() {
        let mut servers = BTreeMap::new();
        servers.insert(
            "sh".to_string(),
            ServerConfig::Stdio {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), SHELL_SERVER.to_string()],
                env: BTreeMap::new(),
            },
        );
        let manager = Arc::new(SessionManager::new(
            TransportConnector::new(),
            servers,
            ClientConfig::default(),
        ));

        let result = manager
            .call_tool(
                "sh",
                "ping",
                Map::new(),
                Duration::from_secs(10),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result, json!("pong"));
        manager.close_all();
    }

    #[tokio::test]
    async fn unreachable_command_fails_connect() {
        let config = ServerConfig::Stdio {
            command: "toolflow-no-such-binary".to_string(),
            args: vec![],
            env: BTreeMap::new(),
        };
        let err = TransportConnector::new()
            .connect("ghost", &config)
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::Connect { .. }));
    }
}
