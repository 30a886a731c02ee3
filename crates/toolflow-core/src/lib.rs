//! Workflow engine and tool-invocation protocol for toolflow.
//!
//! This crate defines the "ports" (`ToolInvoker`, `Connector`,
//! `WorkflowRepository`, `ProgressSink`) that the infrastructure layer
//! implements. It depends only on `toolflow-types` -- never on
//! `toolflow-infra` or any process/network crate.

pub mod event;
pub mod protocol;
pub mod repository;
pub mod service;
pub mod workflow;
