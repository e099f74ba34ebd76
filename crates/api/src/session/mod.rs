//! MCP session management
//!
//! A session lives exactly as long as its SSE stream. Messages posted for a
//! session are dispatched under its FIFO lock and replies go out through its
//! sender.

pub mod connection;
pub mod registry;

pub use connection::{Session, SessionId};
pub use registry::{SessionGuard, SessionRegistry};
