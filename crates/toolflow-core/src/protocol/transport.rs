//! Ports between the engine and the outside world.
//!
//! `ToolInvoker` is what the executor calls to run one node; the session
//! manager implements it. `Connector` is what the session manager uses to
//! open a message channel to a tool server; the infrastructure layer
//! implements it for stdio child processes and HTTP endpoints.
//!
//! Uses RPITIT (return-position `impl Trait` in traits) for async methods.

use std::future::Future;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use toolflow_types::config::ServerConfig;

use super::error::InvokeError;

/// Executes tool calls on behalf of workflow nodes.
pub trait ToolInvoker: Send + Sync + 'static {
    /// Call `tool` on `server` and return its result.
    ///
    /// Must resolve within `timeout`, and as soon as practical after
    /// `cancel` fires, with `InvokeError::Cancelled`.
    fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Map<String, Value>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Value, InvokeError>> + Send;

    /// Declare that a run is about to use `servers`.
    fn retain(&self, servers: &[String]);

    /// Declare that a run no longer uses `servers`.
    fn release(&self, servers: &[String]);
}

/// A bidirectional stream of single JSON-RPC messages.
///
/// Dropping `outbound` closes the transport; `inbound` yields `None` once
/// the server side has gone away.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

/// Opens connections to configured tool servers.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        server_id: &str,
        config: &ServerConfig,
    ) -> impl Future<Output = Result<Connection, InvokeError>> + Send;
}
