use thiserror::Error;
use toolflow_types::protocol::ErrorObject;

/// A message that is not valid JSON-RPC 2.0.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("unexpected payload for {method}: {reason}")]
    InvalidPayload { method: String, reason: String },
}

/// Why a single tool call failed. Node failures are values of this type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvokeError {
    #[error("unknown tool server '{0}'")]
    UnknownServer(String),

    #[error("failed to connect to '{server}': {reason}")]
    Connect { server: String, reason: String },

    #[error("handshake with '{server}' failed: {reason}")]
    Handshake { server: String, reason: String },

    #[error("call to '{server}' timed out after {secs}s")]
    Timeout { server: String, secs: u64 },

    #[error("call cancelled")]
    Cancelled,

    #[error("connection to '{0}' closed")]
    Closed(String),

    #[error("'{server}' returned error {error}")]
    Rpc { server: String, error: ErrorObject },

    #[error("tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
