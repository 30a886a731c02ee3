//! Broadcast event bus for distributing run progress to multiple subscribers.
//!
//! Built on `tokio::sync::broadcast`, the `EventBus` supports multiple
//! concurrent subscribers. Publishing with no active subscribers is a no-op,
//! and a subscriber that falls behind loses the oldest events instead of
//! slowing the publisher.

use tokio::sync::broadcast;
use toolflow_types::event::{ProgressEvent, RunEvent};

use super::sink::ProgressSink;

/// Multi-consumer bus of `RunEvent`s from every run in the process.
///
/// Cloning the bus clones the sender, allowing multiple producers and
/// consumers.
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no subscribers, the event is silently dropped.
    pub fn publish(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    /// A progress sink that tags every event with `execution_id`.
    pub fn sink(&self, execution_id: impl Into<String>) -> BusSink {
        BusSink {
            bus: self.clone(),
            execution_id: execution_id.into(),
        }
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

/// `ProgressSink` adapter publishing onto an `EventBus`.
#[derive(Debug, Clone)]
pub struct BusSink {
    bus: EventBus,
    execution_id: String,
}

impl ProgressSink for BusSink {
    fn emit(&self, event: ProgressEvent) {
        self.bus.publish(RunEvent {
            execution_id: self.execution_id.clone(),
            event,
        });
    }
}
