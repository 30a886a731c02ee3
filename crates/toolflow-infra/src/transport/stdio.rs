//! Stdio transport: a child process speaking newline-delimited JSON.
//!
//! Each outbound message is written to the child's stdin followed by `\n`;
//! each line on its stdout is one inbound message. Stderr is forwarded to
//! `tracing` at debug level. Closing the outbound channel closes stdin and
//! gives the child a short grace period before it is killed.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use toolflow_core::protocol::{Connection, InvokeError};

use super::CHANNEL_CAPACITY;

/// How long a child may take to exit after stdin closes.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Spawn `command` and wire its stdio to a [`Connection`].
pub fn connect(
    server_id: &str,
    command: &str,
    args: &[String],
    env: &BTreeMap<String, String>,
) -> Result<Connection, InvokeError> {
    let mut child = Command::new(command)
        .args(args)
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| InvokeError::Connect {
            server: server_id.to_string(),
            reason: format!("failed to spawn '{command}': {e}"),
        })?;

    let missing = |pipe: &str| InvokeError::Connect {
        server: server_id.to_string(),
        reason: format!("child process has no {pipe}"),
    };
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    tracing::info!(server = server_id, command, pid = child.id(), "spawned tool server");

    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);

    tokio::spawn(write_loop(server_id.to_string(), child, stdin, outbound_rx));

    let server = server_id.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if inbound_tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::debug!(server = %server, "tool server closed stdout");
                    break;
                }
                Err(e) => {
                    tracing::warn!(server = %server, error = %e, "failed to read tool server stdout");
                    break;
                }
            }
        }
    });

    let server = server_id.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server, "stderr: {line}");
        }
    });

    Ok(Connection {
        outbound: outbound_tx,
        inbound: inbound_rx,
    })
}

async fn write_loop(
    server: String,
    mut child: Child,
    mut stdin: ChildStdin,
    mut outbound: mpsc::Receiver<String>,
) {
    while let Some(message) = outbound.recv().await {
        let mut line = message.into_bytes();
        line.push(b'\n');
        let written = match stdin.write_all(&line).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::warn!(server = %server, error = %e, "failed to write to tool server stdin");
            break;
        }
    }
    drop(stdin);

    match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!(server = %server, %status, "tool server exited"),
        Ok(Err(e)) => tracing::warn!(server = %server, error = %e, "failed to wait for tool server"),
        Err(_) => {
            tracing::debug!(server = %server, "tool server did not exit, killing it");
            if let Err(e) = child.kill().await {
                tracing::warn!(server = %server, error = %e, "failed to kill tool server");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lines_round_trip_through_child() {
        let mut conn = connect("cat", "cat", &[], &BTreeMap::new()).unwrap();

        conn.outbound
            .send(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#.to_string())
            .await
            .unwrap();
        let echoed = conn.inbound.recv().await.unwrap();
        assert_eq!(echoed, r#"{"jsonrpc":"2.0","method":"ping","id":1}"#);
    }

    #[tokio::test]
    async fn env_is_passed_and_exit_closes_inbound() {
        let mut env = BTreeMap::new();
        env.insert("TOOLFLOW_TEST_VALUE".to_string(), "hello".to_string());
        let mut conn = connect(
            "env",
            "printenv",
            &["TOOLFLOW_TEST_VALUE".to_string()],
            &env,
        )
        .unwrap();

        assert_eq!(conn.inbound.recv().await.as_deref(), Some("hello"));
        assert_eq!(conn.inbound.recv().await, None);
    }

    #[tokio::test]
    async fn missing_command_is_a_connect_error() {
        let err = connect("ghost", "toolflow-no-such-binary", &[], &BTreeMap::new()).unwrap_err();
        match err {
            InvokeError::Connect { server, reason } => {
                assert_eq!(server, "ghost");
                assert!(reason.contains("toolflow-no-such-binary"));
            }
            other => panic!("expected connect error, got {other:?}"),
        }
    }
}
