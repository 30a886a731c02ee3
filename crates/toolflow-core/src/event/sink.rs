//! Progress sinks: where a running workflow reports what it is doing.

use std::sync::{Mutex, PoisonError};

use toolflow_types::event::ProgressEvent;
use toolflow_types::run::NodeStatus;

/// Receives progress events from a run.
///
/// `emit` is called from the run's control flow and must not block.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every status a node passed through, in order.
    pub fn statuses(&self, node_id: &str) -> Vec<NodeStatus> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::NodeState { node_id: id, status } if id == node_id => Some(status),
                _ => None,
            })
            .collect()
    }

    /// Number of terminal (`complete` or `error`) events seen.
    pub fn terminal_count(&self) -> usize {
        self.events().iter().filter(|e| e.is_terminal()).count()
    }
}

impl ProgressSink for CollectingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
