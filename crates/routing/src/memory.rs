//! In-process budget and request-cache store.
//!
//! Used by tests and single-node development setups. State is lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use mcpgw_shared::{Budget, StoreResult, UserId};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::store::{BudgetStore, CacheEntry, RequestCacheStore, DEFAULT_MONTHLY_LIMIT_CENTS};

#[derive(Default)]
pub struct MemoryRoutingStore {
    budgets: Mutex<HashMap<UserId, Budget>>,
    cache: Mutex<HashMap<(UserId, String), CacheEntry>>,
}

impl MemoryRoutingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a user's budget row
    pub async fn set_budget(&self, user_id: UserId, monthly_limit_cents: i64, current_usage_cents: i64) {
        self.budgets.lock().await.insert(
            user_id,
            Budget {
                user_id,
                monthly_limit_cents,
                current_usage_cents,
                updated_at: OffsetDateTime::now_utc(),
            },
        );
    }

    pub async fn cache_entry(&self, user_id: UserId, cache_key: &str) -> Option<CacheEntry> {
        self.cache
            .lock()
            .await
            .get(&(user_id, cache_key.to_string()))
            .cloned()
    }

    pub async fn cache_len(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[async_trait]
impl BudgetStore for MemoryRoutingStore {
    async fn get_budget(&self, user_id: UserId) -> StoreResult<Option<Budget>> {
        Ok(self.budgets.lock().await.get(&user_id).cloned())
    }

    async fn debit(&self, user_id: UserId, cents: i64) -> StoreResult<Option<Budget>> {
        let mut budgets = self.budgets.lock().await;
        let now = OffsetDateTime::now_utc();
        let budget = budgets.entry(user_id).or_insert_with(|| Budget {
            user_id,
            monthly_limit_cents: DEFAULT_MONTHLY_LIMIT_CENTS,
            current_usage_cents: 0,
            updated_at: now,
        });
        if budget.is_exhausted() {
            return Ok(None);
        }
        budget.current_usage_cents = budget.current_usage_cents.saturating_add(cents);
        budget.updated_at = now;
        Ok(Some(budget.clone()))
    }
}

#[async_trait]
impl RequestCacheStore for MemoryRoutingStore {
    async fn touch(
        &self,
        user_id: UserId,
        cache_key: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<OffsetDateTime>> {
        let mut cache = self.cache.lock().await;
        match cache.get_mut(&(user_id, cache_key.to_string())) {
            Some(entry) => {
                let previous = entry.last_seen_at;
                entry.last_seen_at = now;
                entry.hit_count += 1;
                Ok(Some(previous))
            }
            None => {
                cache.insert(
                    (user_id, cache_key.to_string()),
                    CacheEntry {
                        user_id,
                        cache_key: cache_key.to_string(),
                        last_seen_at: now,
                        hit_count: 1,
                    },
                );
                Ok(None)
            }
        }
    }

    async fn sweep(&self, user_id: UserId, older_than: OffsetDateTime) -> StoreResult<u64> {
        let mut cache = self.cache.lock().await;
        let before = cache.len();
        cache.retain(|(owner, _), entry| *owner != user_id || entry.last_seen_at >= older_than);
        Ok((before - cache.len()) as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use time::Duration;

    #[tokio::test]
    async fn test_debit_inserts_default_limit() {
        let store = MemoryRoutingStore::new();
        let user = UserId::new();
        let budget = store.debit(user, 25).await.unwrap().unwrap();
        assert_eq!(budget.monthly_limit_cents, DEFAULT_MONTHLY_LIMIT_CENTS);
        assert_eq!(budget.current_usage_cents, 25);
    }

    #[tokio::test]
    async fn test_debit_refused_once_exhausted() {
        let store = MemoryRoutingStore::new();
        let user = UserId::new();
        store.set_budget(user, 10, 9).await;

        let crossed = store.debit(user, 4).await.unwrap().unwrap();
        assert_eq!(crossed.current_usage_cents, 13);
        assert!(store.debit(user, 4).await.unwrap().is_none());
        assert_eq!(store.get_budget(user).await.unwrap().unwrap().current_usage_cents, 13);
    }

    #[tokio::test]
    async fn test_concurrent_debits_overshoot_by_one_call() {
        let store = std::sync::Arc::new(MemoryRoutingStore::new());
        let user = UserId::new();
        store.set_budget(user, 10, 9).await;

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.debit(user, 3).await.unwrap() })
            })
            .collect();
        let mut applied = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        let budget = store.get_budget(user).await.unwrap().unwrap();
        assert!(budget.current_usage_cents <= budget.monthly_limit_cents + 3);
    }

    #[tokio::test]
    async fn test_touch_bumps_hit_count() {
        let store = MemoryRoutingStore::new();
        let user = UserId::new();
        let t0 = OffsetDateTime::now_utc();

        assert_eq!(store.touch(user, "abc", t0).await.unwrap(), None);
        let t1 = t0 + Duration::seconds(3);
        assert_eq!(store.touch(user, "abc", t1).await.unwrap(), Some(t0));

        let entry = store.cache_entry(user, "abc").await.unwrap();
        assert_eq!(entry.hit_count, 2);
        assert_eq!(entry.last_seen_at, t1);
    }

    #[tokio::test]
    async fn test_sweep_only_touches_owner() {
        let store = MemoryRoutingStore::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let old = OffsetDateTime::now_utc() - Duration::minutes(10);

        store.touch(alice, "a", old).await.unwrap();
        store.touch(bob, "b", old).await.unwrap();

        let removed = store.sweep(alice, OffsetDateTime::now_utc()).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.cache_entry(bob, "b").await.is_some());
    }
}
