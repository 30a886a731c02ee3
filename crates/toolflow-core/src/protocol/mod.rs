//! JSON-RPC tool-invocation protocol.
//!
//! `codec` builds and classifies messages, `session` keeps one initialized
//! connection per tool server and correlates replies, `transport` holds the
//! ports the executor and the infrastructure adapters meet at, and `origin`
//! guards the inbound endpoint.

pub mod codec;
pub mod error;
pub mod origin;
pub mod session;
pub mod transport;

pub use error::{InvokeError, ProtocolError};
pub use origin::is_allowed_origin;
pub use session::{SessionManager, SessionState};
pub use transport::{Connection, Connector, ToolInvoker};
