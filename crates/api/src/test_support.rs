//! In-process application fixture for router and handler tests
#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use mcpgw_routing::{MemoryRoutingStore, RoutingEngine};
use mcpgw_shared::User;

use crate::auth::generate_key;
use crate::config::Config;
use crate::state::AppState;
use crate::store::{AccountStore, MemoryAccountStore, NewApiKey};

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryAccountStore>,
    pub routing_store: Arc<MemoryRoutingStore>,
    pub user: User,
    /// Plaintext key for `user`
    pub api_key: String,
}

pub async fn test_app() -> TestApp {
    let store = Arc::new(MemoryAccountStore::new());
    let routing_store = Arc::new(MemoryRoutingStore::new());
    let user = store.insert_user("alice", "alice@example.com").await;

    let key = generate_key();
    store
        .create_api_key(NewApiKey {
            user_id: user.id,
            name: "test".to_string(),
            key_prefix: key.prefix,
            key_hash: key.hash,
            expires_at: None,
        })
        .await
        .unwrap();

    let routing = RoutingEngine::new(routing_store.clone()).with_sweep_probability(0.0);
    let state = AppState::with_routing(Config::for_tests(), store.clone(), routing).unwrap();

    TestApp {
        state,
        store,
        routing_store,
        user,
        api_key: key.plaintext,
    }
}
