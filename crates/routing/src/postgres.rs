//! Postgres-backed budget and request-cache store

use async_trait::async_trait;
use mcpgw_shared::{Budget, StoreResult, UserId};
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::store::{BudgetStore, RequestCacheStore, DEFAULT_MONTHLY_LIMIT_CENTS};

#[derive(Clone)]
pub struct PgRoutingStore {
    pool: PgPool,
}

impl PgRoutingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BudgetStore for PgRoutingStore {
    async fn get_budget(&self, user_id: UserId) -> StoreResult<Option<Budget>> {
        let budget: Option<Budget> = sqlx::query_as(
            "SELECT user_id, monthly_limit_cents, current_usage_cents, updated_at
             FROM cost_budgets WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(budget)
    }

    async fn debit(&self, user_id: UserId, cents: i64) -> StoreResult<Option<Budget>> {
        // The WHERE on the conflict arm makes the limit check and the increment
        // one statement; row locking serializes concurrent debits
        let budget: Option<Budget> = sqlx::query_as(
            "INSERT INTO cost_budgets (user_id, monthly_limit_cents, current_usage_cents, updated_at)
             VALUES ($1, $2, $3, NOW())
             ON CONFLICT (user_id) DO UPDATE SET
                 current_usage_cents = cost_budgets.current_usage_cents + EXCLUDED.current_usage_cents,
                 updated_at = NOW()
             WHERE cost_budgets.current_usage_cents < cost_budgets.monthly_limit_cents
             RETURNING user_id, monthly_limit_cents, current_usage_cents, updated_at",
        )
        .bind(user_id)
        .bind(DEFAULT_MONTHLY_LIMIT_CENTS)
        .bind(cents)
        .fetch_optional(&self.pool)
        .await?;
        Ok(budget)
    }
}

#[async_trait]
impl RequestCacheStore for PgRoutingStore {
    async fn touch(
        &self,
        user_id: UserId,
        cache_key: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<OffsetDateTime>> {
        // The CTE reads the row as it was before the upsert
        let previous: Option<OffsetDateTime> = sqlx::query_scalar(
            "WITH previous AS (
                 SELECT last_seen_at FROM request_cache
                 WHERE user_id = $1 AND cache_key = $2
             )
             INSERT INTO request_cache (user_id, cache_key, last_seen_at, hit_count)
             VALUES ($1, $2, $3, 1)
             ON CONFLICT (user_id, cache_key) DO UPDATE SET
                 last_seen_at = EXCLUDED.last_seen_at,
                 hit_count = request_cache.hit_count + 1
             RETURNING (SELECT last_seen_at FROM previous)",
        )
        .bind(user_id)
        .bind(cache_key)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(previous)
    }

    async fn sweep(&self, user_id: UserId, older_than: OffsetDateTime) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM request_cache WHERE user_id = $1 AND last_seen_at < $2")
            .bind(user_id)
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
