//! Infrastructure layer for toolflow.
//!
//! Contains implementations of the ports defined in `toolflow-core`: the
//! stdio and Streamable HTTP tool-server transports, the in-memory workflow
//! repository, and the configuration loader.

pub mod config;
pub mod repository;
pub mod transport;
