//! Run progress reporting.
//!
//! `ProgressSink` is the port a run reports through. `EventBus` fans events
//! from every run out to any number of subscribers (WebSocket clients, the
//! CLI renderer) via a `tokio::sync::broadcast` channel.

pub mod bus;
pub mod sink;

pub use bus::{BusSink, EventBus};
pub use sink::{CollectingSink, NullSink, ProgressSink};
