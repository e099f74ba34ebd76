//! Routing & budget engine
//!
//! `route` turns a model-completion request into a [`RoutingResult`] under the
//! user's monthly budget; `settle` debits a billable result exactly once.

use std::sync::Arc;

use mcpgw_shared::{Budget, UserId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use crate::error::EngineResult;
use crate::pricing::{self, DEFAULT_MODEL};
use crate::request::ModelRequest;
use crate::store::{BudgetStore, RequestCacheStore, RoutingStore, DEFAULT_MONTHLY_LIMIT_CENTS};

/// How long a seen request counts as a cache hit
pub const REQUEST_CACHE_TTL: Duration = Duration::minutes(5);

/// Chance that a `route` call sweeps the user's expired cache rows
pub const CACHE_SWEEP_PROBABILITY: f64 = 0.05;

/// Model reported when a request is refused for budget
pub const RATE_LIMITED_MODEL: &str = "none";

/// Routing decision for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingResult {
    pub target_model: String,
    pub target_endpoint: String,
    pub estimated_cost_cents: i64,
    pub cache_hit: bool,
    pub rate_limited: bool,
}

impl RoutingResult {
    pub fn rate_limited() -> Self {
        Self {
            target_model: RATE_LIMITED_MODEL.to_string(),
            target_endpoint: String::new(),
            estimated_cost_cents: 0,
            cache_hit: false,
            rate_limited: true,
        }
    }

    /// Whether settling this result should debit the budget
    pub fn is_billable(&self) -> bool {
        !self.rate_limited && !self.cache_hit && self.estimated_cost_cents > 0
    }
}

/// Outcome of [`RoutingEngine::settle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Rate limited, cached or free: nothing to debit
    NotBillable,
    Debited(Budget),
    /// The budget ran out between routing and settling
    Refused,
}

impl Settlement {
    /// The result to report to the caller. A refused debit reads as rate limited.
    pub fn apply(&self, result: RoutingResult) -> RoutingResult {
        match self {
            Settlement::Refused => RoutingResult::rate_limited(),
            _ => result,
        }
    }
}

pub struct RoutingEngine {
    store: Arc<dyn RoutingStore>,
    cache_ttl: Duration,
    sweep_probability: f64,
}

impl RoutingEngine {
    pub fn new(store: Arc<dyn RoutingStore>) -> Self {
        Self {
            store,
            cache_ttl: REQUEST_CACHE_TTL,
            sweep_probability: CACHE_SWEEP_PROBABILITY,
        }
    }

    /// Override how long a repeated request counts as a cache hit
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Override the sweep chance; clamped to `0.0..=1.0`
    pub fn with_sweep_probability(mut self, probability: f64) -> Self {
        self.sweep_probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        self
    }

    /// The user's budget, or the implicit default when no row exists yet
    pub async fn budget(&self, user_id: UserId) -> EngineResult<Budget> {
        let budget = self.store.get_budget(user_id).await?;
        Ok(budget.unwrap_or_else(|| Budget {
            user_id,
            monthly_limit_cents: DEFAULT_MONTHLY_LIMIT_CENTS,
            current_usage_cents: 0,
            updated_at: OffsetDateTime::now_utc(),
        }))
    }

    /// Decide model, endpoint and cost for `request` without debiting anything
    pub async fn route(&self, request: &ModelRequest, user_id: UserId) -> EngineResult<RoutingResult> {
        let budget = self.budget(user_id).await?;
        if budget.is_exhausted() {
            info!(
                user_id = %user_id,
                usage_cents = budget.current_usage_cents,
                limit_cents = budget.monthly_limit_cents,
                "Monthly budget exhausted, request rate limited"
            );
            return Ok(RoutingResult::rate_limited());
        }

        let requested = request.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let model = pricing::select_model(request.model.as_deref(), budget.remaining_cents());
        if model != requested {
            info!(
                user_id = %user_id,
                requested_model = %requested,
                target_model = %model,
                remaining_cents = budget.remaining_cents(),
                "Low budget, downgrading model"
            );
        }

        let endpoint = pricing::endpoint_for(model);
        let cost = pricing::estimate_cost_cents(
            model,
            request.estimated_input_tokens(),
            request.estimated_output_tokens(),
        );

        let now = OffsetDateTime::now_utc();
        let cache_key = request.cache_key();
        let previous = self.store.touch(user_id, &cache_key, now).await?;
        let cache_hit = previous.is_some_and(|seen| now - seen < self.cache_ttl);

        self.maybe_sweep(user_id, now).await;

        debug!(
            user_id = %user_id,
            target_model = %model,
            estimated_cost_cents = cost,
            cache_hit,
            "Request routed"
        );

        Ok(RoutingResult {
            target_model: model.to_string(),
            target_endpoint: endpoint.to_string(),
            estimated_cost_cents: if cache_hit { 0 } else { cost },
            cache_hit,
            rate_limited: false,
        })
    }

    /// Debit a routed result. The store applies the debit only while the
    /// budget is not yet exhausted, so racing calls are refused here even
    /// though each passed the check in `route`.
    pub async fn settle(&self, user_id: UserId, result: &RoutingResult) -> EngineResult<Settlement> {
        if !result.is_billable() {
            return Ok(Settlement::NotBillable);
        }
        match self.store.debit(user_id, result.estimated_cost_cents).await? {
            Some(budget) => {
                debug!(
                    user_id = %user_id,
                    debited_cents = result.estimated_cost_cents,
                    usage_cents = budget.current_usage_cents,
                    "Budget settled"
                );
                Ok(Settlement::Debited(budget))
            }
            None => {
                info!(
                    user_id = %user_id,
                    cost_cents = result.estimated_cost_cents,
                    "Budget exhausted before settling, request rate limited"
                );
                Ok(Settlement::Refused)
            }
        }
    }

    async fn maybe_sweep(&self, user_id: UserId, now: OffsetDateTime) {
        let should_sweep = rand::thread_rng().gen_bool(self.sweep_probability);
        if !should_sweep {
            return;
        }
        match self.store.sweep(user_id, now - self.cache_ttl).await {
            Ok(removed) => debug!(user_id = %user_id, removed, "Swept expired cache entries"),
            Err(e) => warn!(user_id = %user_id, error = %e, "Cache sweep failed"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryRoutingStore;
    use crate::pricing::CHEAP_MODELS;
    use crate::request::ChatMessage;

    fn engine(store: &Arc<MemoryRoutingStore>) -> RoutingEngine {
        RoutingEngine::new(store.clone()).with_sweep_probability(0.0)
    }

    fn request(model: &str, text: &str) -> ModelRequest {
        ModelRequest::new(model, vec![ChatMessage::user(text)])
    }

    #[tokio::test]
    async fn test_exhausted_budget_is_rate_limited() {
        let store = Arc::new(MemoryRoutingStore::new());
        let user = UserId::new();
        store.set_budget(user, 10_000, 10_000).await;

        let result = engine(&store).route(&request("gpt-4o", "hi"), user).await.unwrap();
        assert_eq!(result, RoutingResult::rate_limited());
        assert_eq!(result.target_model, "none");
        assert_eq!(result.target_endpoint, "");
        // refused requests never reach the cache
        assert_eq!(store.cache_len().await, 0);
    }

    #[tokio::test]
    async fn test_low_budget_downgrades_expensive_model() {
        let store = Arc::new(MemoryRoutingStore::new());
        let user = UserId::new();
        store.set_budget(user, 10_000, 9_950).await;

        let result = engine(&store)
            .route(&request("claude-3-opus", "hi"), user)
            .await
            .unwrap();
        assert!(!result.rate_limited);
        assert!(CHEAP_MODELS.contains(&result.target_model.as_str()));
        assert_eq!(result.target_endpoint, "https://api.anthropic.com/v1/messages");
    }

    #[tokio::test]
    async fn test_missing_budget_uses_default_limit() {
        let store = Arc::new(MemoryRoutingStore::new());
        let user = UserId::new();
        let engine = engine(&store);

        let budget = engine.budget(user).await.unwrap();
        assert_eq!(budget.monthly_limit_cents, DEFAULT_MONTHLY_LIMIT_CENTS);

        let result = engine.route(&request("claude-3-opus", "hi"), user).await.unwrap();
        assert_eq!(result.target_model, "claude-3-opus");
        // 1 input token + 1000 output tokens at 7500 cents/M rounds up to 8
        assert_eq!(result.estimated_cost_cents, 8);
    }

    #[tokio::test]
    async fn test_repeat_request_is_cache_hit() {
        let store = Arc::new(MemoryRoutingStore::new());
        let user = UserId::new();
        let engine = engine(&store);
        let req = request("gpt-4o", "same prompt");

        let first = engine.route(&req, user).await.unwrap();
        assert!(!first.cache_hit);
        assert!(first.estimated_cost_cents > 0);

        let second = engine.route(&req, user).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.estimated_cost_cents, 0);
        assert!(!second.is_billable());

        let entry = store.cache_entry(user, &req.cache_key()).await.unwrap();
        assert_eq!(entry.hit_count, 2);
    }

    #[tokio::test]
    async fn test_configured_ttl_bounds_hits() {
        let store = Arc::new(MemoryRoutingStore::new());
        let user = UserId::new();
        let req = request("gpt-4o", "ttl prompt");
        let seen = OffsetDateTime::now_utc() - Duration::seconds(90);
        store.touch(user, &req.cache_key(), seen).await.unwrap();

        let short = engine(&store).with_cache_ttl(Duration::minutes(1));
        assert!(!short.route(&req, user).await.unwrap().cache_hit);

        store.touch(user, &req.cache_key(), seen).await.unwrap();
        let long = engine(&store).with_cache_ttl(Duration::minutes(2));
        assert!(long.route(&req, user).await.unwrap().cache_hit);
    }

    #[tokio::test]
    async fn test_cache_is_per_user() {
        let store = Arc::new(MemoryRoutingStore::new());
        let engine = engine(&store);
        let req = request("gpt-4o", "shared prompt");

        engine.route(&req, UserId::new()).await.unwrap();
        let other = engine.route(&req, UserId::new()).await.unwrap();
        assert!(!other.cache_hit);
    }

    #[tokio::test]
    async fn test_expired_entry_is_not_a_hit() {
        let store = Arc::new(MemoryRoutingStore::new());
        let user = UserId::new();
        let req = request("gpt-4o", "old prompt");
        let stale = OffsetDateTime::now_utc() - Duration::minutes(6);
        store.touch(user, &req.cache_key(), stale).await.unwrap();

        let result = engine(&store).route(&req, user).await.unwrap();
        assert!(!result.cache_hit);
        assert!(result.estimated_cost_cents > 0);
    }

    #[tokio::test]
    async fn test_settled_usage_sums_costs() {
        let store = Arc::new(MemoryRoutingStore::new());
        let user = UserId::new();
        let engine = engine(&store);

        let mut expected = 0;
        for i in 0..5 {
            let result = engine
                .route(&request("gpt-4", &format!("prompt {i}")), user)
                .await
                .unwrap();
            expected += result.estimated_cost_cents;
            let before = engine.budget(user).await.unwrap().current_usage_cents;
            engine.settle(user, &result).await.unwrap();
            let after = engine.budget(user).await.unwrap().current_usage_cents;
            assert!(after >= before);
        }
        assert_eq!(engine.budget(user).await.unwrap().current_usage_cents, expected);
    }

    #[tokio::test]
    async fn test_settle_skips_unbillable_results() {
        let store = Arc::new(MemoryRoutingStore::new());
        let user = UserId::new();
        let engine = engine(&store);

        let cached = RoutingResult {
            target_model: "gpt-4o".to_string(),
            target_endpoint: pricing::endpoint_for("gpt-4o").to_string(),
            estimated_cost_cents: 0,
            cache_hit: true,
            rate_limited: false,
        };
        assert_eq!(engine.settle(user, &cached).await.unwrap(), Settlement::NotBillable);
        assert_eq!(
            engine.settle(user, &RoutingResult::rate_limited()).await.unwrap(),
            Settlement::NotBillable
        );
        assert!(store.get_budget(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_limit_reached_stays_rate_limited() {
        let store = Arc::new(MemoryRoutingStore::new());
        let user = UserId::new();
        store.set_budget(user, 10, 9).await;
        let engine = engine(&store);

        let result = engine
            .route(&request("gpt-4", "please write a long essay"), user)
            .await
            .unwrap();
        engine.settle(user, &result).await.unwrap();
        let budget = engine.budget(user).await.unwrap();
        assert!(budget.is_exhausted());
        // overshoot is bounded by the single call that crossed the limit
        assert!(budget.current_usage_cents - budget.monthly_limit_cents <= result.estimated_cost_cents);

        for i in 0..3 {
            let next = engine
                .route(&request("gpt-4o-mini", &format!("again {i}")), user)
                .await
                .unwrap();
            assert!(next.rate_limited);
            assert_eq!(next.estimated_cost_cents, 0);
        }
    }

    /// Budget reads stall so every concurrent `route` sees the same usage
    struct StaleBudgetReads(Arc<MemoryRoutingStore>);

    #[async_trait::async_trait]
    impl BudgetStore for StaleBudgetReads {
        async fn get_budget(&self, user_id: UserId) -> mcpgw_shared::StoreResult<Option<Budget>> {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.0.get_budget(user_id).await
        }

        async fn debit(&self, user_id: UserId, cents: i64) -> mcpgw_shared::StoreResult<Option<Budget>> {
            self.0.debit(user_id, cents).await
        }
    }

    #[async_trait::async_trait]
    impl RequestCacheStore for StaleBudgetReads {
        async fn touch(
            &self,
            user_id: UserId,
            cache_key: &str,
            now: OffsetDateTime,
        ) -> mcpgw_shared::StoreResult<Option<OffsetDateTime>> {
            self.0.touch(user_id, cache_key, now).await
        }

        async fn sweep(&self, user_id: UserId, older_than: OffsetDateTime) -> mcpgw_shared::StoreResult<u64> {
            self.0.sweep(user_id, older_than).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_route_and_settle_overshoot_by_one_call() {
        let store = Arc::new(MemoryRoutingStore::new());
        let user = UserId::new();
        store.set_budget(user, 10, 9).await;
        let engine = Arc::new(
            RoutingEngine::new(Arc::new(StaleBudgetReads(store.clone()))).with_sweep_probability(0.0),
        );

        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let routed = engine
                        .route(&request("gpt-4", &format!("parallel {i}")), user)
                        .await
                        .unwrap();
                    let settlement = engine.settle(user, &routed).await.unwrap();
                    (routed.estimated_cost_cents, settlement.apply(routed))
                })
            })
            .collect();

        let mut max_cost = 0;
        let mut billed = 0;
        let mut refused = 0;
        for task in tasks {
            let (cost, reported) = task.await.unwrap();
            max_cost = max_cost.max(cost);
            if reported.rate_limited {
                refused += 1;
                assert_eq!(reported.estimated_cost_cents, 0);
            } else {
                billed += 1;
            }
        }

        assert_eq!(billed, 1);
        assert_eq!(refused, 9);
        let budget = store.get_budget(user).await.unwrap().unwrap();
        assert!(budget.current_usage_cents <= budget.monthly_limit_cents + max_cost);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_entries() {
        let store = Arc::new(MemoryRoutingStore::new());
        let user = UserId::new();
        let stale = OffsetDateTime::now_utc() - Duration::minutes(30);
        store.touch(user, "stale", stale).await.unwrap();

        let engine = RoutingEngine::new(store.clone()).with_sweep_probability(1.0);
        engine.route(&request("gpt-4o", "fresh"), user).await.unwrap();

        assert!(store.cache_entry(user, "stale").await.is_none());
        assert_eq!(store.cache_len().await, 1);
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let json = serde_json::to_value(RoutingResult::rate_limited()).unwrap();
        assert_eq!(json["targetModel"], "none");
        assert_eq!(json["rateLimited"], true);
        assert_eq!(json["estimatedCostCents"], 0);
        assert_eq!(json["cacheHit"], false);
        assert_eq!(json["targetEndpoint"], "");
    }
}
