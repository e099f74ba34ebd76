//! Application state

use std::sync::Arc;

use mcpgw_routing::{RoutingEngine, RoutingStore};

use crate::auth::ApiKeyAuthenticator;
use crate::config::Config;
use crate::mcp::{McpDispatcher, UpstreamProxy};
use crate::session::SessionRegistry;
use crate::store::AccountStore;
use crate::tools::AccountToolExecutor;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn AccountStore>,
    pub sessions: SessionRegistry,
    pub routing: Arc<RoutingEngine>,
    pub tools: Arc<AccountToolExecutor>,
    pub proxy: Arc<UpstreamProxy>,
    pub dispatcher: Arc<McpDispatcher>,
    pub auth: Arc<ApiKeyAuthenticator>,
}

impl AppState {
    /// Wire every component from the two stores.
    /// Fails only if the upstream HTTP client cannot be built.
    pub fn new(
        config: Config,
        store: Arc<dyn AccountStore>,
        routing_store: Arc<dyn RoutingStore>,
    ) -> Result<Self, reqwest::Error> {
        let routing = RoutingEngine::new(routing_store).with_cache_ttl(config.request_cache_ttl());
        Self::with_routing(config, store, routing)
    }

    /// Same as [`AppState::new`] with a preconfigured routing engine
    pub fn with_routing(
        config: Config,
        store: Arc<dyn AccountStore>,
        routing: RoutingEngine,
    ) -> Result<Self, reqwest::Error> {
        let routing = Arc::new(routing);
        let proxy = Arc::new(
            UpstreamProxy::new(store.clone(), config.mcp_request_timeout())?
                .with_max_response_bytes(config.mcp_max_response_body_bytes),
        );
        let tools = Arc::new(AccountToolExecutor::new(
            store.clone(),
            routing.clone(),
            config.public_url.clone(),
        ));
        let dispatcher = Arc::new(McpDispatcher::new(tools.clone(), proxy.clone()));
        let auth = Arc::new(ApiKeyAuthenticator::new(store.clone()));

        Ok(Self {
            config: Arc::new(config),
            store,
            sessions: SessionRegistry::new(),
            routing,
            tools,
            proxy,
            dispatcher,
            auth,
        })
    }
}
