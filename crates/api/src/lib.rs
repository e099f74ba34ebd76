//! MCP Gateway API Library
//!
//! HTTP surface of the gateway: SSE relay sessions, the direct tool-call
//! endpoint, API key authentication and trace propagation.

pub mod auth;
pub mod config;
pub mod error;
pub mod mcp;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod tools;
pub mod trace;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
