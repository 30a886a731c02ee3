//! Shared domain types for toolflow.
//!
//! This crate contains the data that crosses crate boundaries: workflow
//! definitions, run state and results, progress events, the JSON-RPC wire
//! shapes spoken to tool servers, and configuration.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod protocol;
pub mod run;
pub mod workflow;
