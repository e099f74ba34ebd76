//! Model routing and spend budgets for the MCP gateway
//!
//! Decides which provider model and endpoint a completion request should go to,
//! estimates its cost, enforces each user's monthly spend cap and recognizes
//! repeats of a recent request through a short-lived per-user cache.
//!
//! The engine never performs the completion call itself.

pub mod engine;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod pricing;
pub mod request;
pub mod store;

pub use engine::{
    RoutingEngine, RoutingResult, Settlement, CACHE_SWEEP_PROBABILITY, REQUEST_CACHE_TTL,
};
pub use error::{EngineResult, RoutingError};
pub use memory::MemoryRoutingStore;
pub use postgres::PgRoutingStore;
pub use request::{ChatMessage, ModelRequest};
pub use store::{
    BudgetStore, CacheEntry, RequestCacheStore, RoutingStore, DEFAULT_MONTHLY_LIMIT_CENTS,
};
