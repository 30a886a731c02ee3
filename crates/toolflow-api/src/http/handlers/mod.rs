//! Route handlers, one module per resource.

pub mod mcp;
pub mod run;
pub mod workflow;
pub mod ws;
