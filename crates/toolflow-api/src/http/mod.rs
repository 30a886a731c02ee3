//! HTTP/REST API layer for toolflow.
//!
//! Axum-based REST API at `/api/v1/` with envelope response format, a
//! WebSocket progress stream per run, and the inbound tool endpoint.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
