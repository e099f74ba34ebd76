//! Routing engine error types

use mcpgw_shared::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Routing store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for routing engine operations
pub type EngineResult<T> = Result<T, RoutingError>;
