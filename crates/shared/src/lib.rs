//! MCP Gateway Shared Types and Utilities
//!
//! Identifier newtypes, persisted record types, store errors and the Postgres
//! connection helpers shared by the routing engine and the API server.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
