//! Progress event types.
//!
//! `ProgressEvent` is what a run reports while it executes. The serialized
//! shape (`type` tag, snake_case) is the streaming wire format seen by
//! WebSocket clients and terminal renderers.

use serde::{Deserialize, Serialize};

use crate::run::{ExecutionResult, LogEntry, NodeStatus};

/// A single progress notification from a running workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A log line was appended to the run log.
    Log { log: LogEntry },

    /// A node changed status.
    NodeState { node_id: String, status: NodeStatus },

    /// The run finished (any overall status). Terminal.
    Complete { result: Box<ExecutionResult> },

    /// The run could not start or aborted. Terminal.
    Error { error: String },
}

impl ProgressEvent {
    /// Whether this event ends the stream for its run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

/// A progress event tagged with the run that produced it.
///
/// Broadcast on the event bus; the event's own fields are flattened next to
/// `execution_id` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub execution_id: String,
    #[serde(flatten)]
    pub event: ProgressEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{LogEntry, LogLevel};
    use serde_json::json;

    #[test]
    fn test_node_state_wire_shape() {
        let event = ProgressEvent::NodeState {
            node_id: "scan".to_string(),
            status: NodeStatus::Running,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "node_state", "node_id": "scan", "status": "running"})
        );
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_error_event_is_terminal() {
        let event = ProgressEvent::Error {
            error: "cycle".to_string(),
        };
        assert!(event.is_terminal());
        assert_eq!(serde_json::to_value(&event).unwrap()["type"], "error");
    }

    #[test]
    fn test_run_event_flattens_payload() {
        let event = RunEvent {
            execution_id: "run-1".to_string(),
            event: ProgressEvent::Log {
                log: LogEntry::new(LogLevel::Warn, Some("scan"), "slow"),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["execution_id"], "run-1");
        assert_eq!(value["type"], "log");
        assert_eq!(value["log"]["node_id"], "scan");

        let back: RunEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }
}
