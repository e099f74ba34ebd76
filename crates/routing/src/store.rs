//! Storage seams for budgets and the request cache

use async_trait::async_trait;
use mcpgw_shared::{Budget, StoreResult, UserId};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Monthly limit applied to users without a budget row ($100.00)
pub const DEFAULT_MONTHLY_LIMIT_CENTS: i64 = 10_000;

/// A recently seen request, keyed by (user, cache key)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub user_id: UserId,
    pub cache_key: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_at: OffsetDateTime,
    pub hit_count: i64,
}

#[async_trait]
pub trait BudgetStore: Send + Sync {
    /// Current budget row, if one exists
    async fn get_budget(&self, user_id: UserId) -> StoreResult<Option<Budget>>;

    /// Add `cents` to the user's usage in one atomic step, creating the row
    /// with the default limit when absent. The debit only applies while usage
    /// is still below the limit, so concurrent callers overshoot by at most one
    /// debit. Returns `None` when the budget was already exhausted.
    async fn debit(&self, user_id: UserId, cents: i64) -> StoreResult<Option<Budget>>;
}

#[async_trait]
pub trait RequestCacheStore: Send + Sync {
    /// Insert or refresh the entry (bumping its hit count) and return the
    /// `last_seen_at` it had before this call.
    async fn touch(
        &self,
        user_id: UserId,
        cache_key: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<OffsetDateTime>>;

    /// Delete the user's entries last seen before `older_than`
    async fn sweep(&self, user_id: UserId, older_than: OffsetDateTime) -> StoreResult<u64>;
}

/// Everything the routing engine needs from storage
pub trait RoutingStore: BudgetStore + RequestCacheStore {}

impl<T: BudgetStore + RequestCacheStore> RoutingStore for T {}
