//! Workflow engine core: definition validation, reference resolution, and DAG execution.
//!
//! - `definition` -- parsing and structural validation
//! - `resolver` -- `${...}` reference substitution in node params
//! - `dag` -- DAG builder, cycle detection, wave computation
//! - `context` -- per-run variable store (params and node results)
//! - `executor` -- wave-based parallel DAG executor

pub mod context;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod resolver;

pub use definition::{ValidationError, WorkflowError, parse_definition, validate_definition};
pub use executor::{DagExecutor, ExecutorError};
