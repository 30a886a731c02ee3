//! Business logic services (use cases).
//!
//! Services orchestrate repository calls and the executor. They depend on
//! traits (ports), never on concrete infrastructure implementations.

pub mod run;

pub use run::{RunService, RunState, ServiceError};
