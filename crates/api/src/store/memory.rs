//! In-process account store for tests and local development

use std::collections::HashMap;

use async_trait::async_trait;
use mcpgw_shared::{
    ApiKey, ApiKeyId, LoraAdapter, McpServer, McpServerId, NewTraceRecord, Project, ProjectId,
    StoreError, StoreResult, UsageSummary, User, UserId,
};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::{AccountStore, McpServerUpdate, NewApiKey, NewMcpServer, NewProject};

/// A recorded trace together with its insertion time
#[derive(Debug, Clone)]
pub struct StoredTrace {
    pub record: NewTraceRecord,
    pub created_at: OffsetDateTime,
}

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    projects: Vec<Project>,
    api_keys: Vec<ApiKey>,
    adapters: Vec<LoraAdapter>,
    servers: Vec<McpServer>,
    traces: Vec<StoredTrace>,
}

#[derive(Default)]
pub struct MemoryAccountStore {
    state: Mutex<State>,
}

fn newest_first<T, F>(mut rows: Vec<T>, created_at: F) -> Vec<T>
where
    F: Fn(&T) -> OffsetDateTime,
{
    rows.sort_by_key(|row| std::cmp::Reverse(created_at(row)));
    rows
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, username: &str, email: &str) -> User {
        let user = User {
            id: UserId::new(),
            username: username.to_string(),
            email: email.to_string(),
            display_name: None,
            avatar_url: None,
            created_at: OffsetDateTime::now_utc(),
        };
        self.state.lock().await.users.insert(user.id, user.clone());
        user
    }

    pub async fn insert_adapter(&self, adapter: LoraAdapter) {
        self.state.lock().await.adapters.push(adapter);
    }

    /// Insert a server row as-is, bypassing slug and URL checks
    pub async fn insert_mcp_server(&self, server: McpServer) {
        self.state.lock().await.servers.push(server);
    }

    pub async fn api_key(&self, id: ApiKeyId) -> Option<ApiKey> {
        self.state
            .lock()
            .await
            .api_keys
            .iter()
            .find(|key| key.id == id)
            .cloned()
    }

    pub async fn traces(&self) -> Vec<StoredTrace> {
        self.state.lock().await.traces.clone()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn find_api_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<ApiKey>> {
        let state = self.state.lock().await;
        Ok(state
            .api_keys
            .iter()
            .filter(|key| key.key_prefix == prefix)
            .cloned()
            .collect())
    }

    async fn touch_api_key(&self, id: ApiKeyId, now: OffsetDateTime) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(key) = state.api_keys.iter_mut().find(|key| key.id == id) {
            key.last_used_at = Some(now);
        }
        Ok(())
    }

    async fn get_user(&self, user_id: UserId) -> StoreResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn list_projects(&self, user_id: UserId) -> StoreResult<Vec<Project>> {
        let state = self.state.lock().await;
        let rows: Vec<Project> = state
            .projects
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |p| p.created_at))
    }

    async fn create_project(&self, project: NewProject) -> StoreResult<Project> {
        let created = Project {
            id: ProjectId::new(),
            user_id: project.user_id,
            name: project.name,
            description: project.description,
            is_public: project.is_public,
            created_at: OffsetDateTime::now_utc(),
        };
        self.state.lock().await.projects.push(created.clone());
        Ok(created)
    }

    async fn usage_summary(
        &self,
        user_id: UserId,
        since: OffsetDateTime,
    ) -> StoreResult<Vec<UsageSummary>> {
        let state = self.state.lock().await;
        let mut groups: HashMap<(String, String), UsageSummary> = HashMap::new();
        for trace in state
            .traces
            .iter()
            .filter(|t| t.record.user_id == user_id && t.created_at >= since)
        {
            let record = &trace.record;
            let entry = groups
                .entry((record.tool_name.clone(), record.model.clone()))
                .or_insert_with(|| UsageSummary {
                    tool_name: record.tool_name.clone(),
                    model: record.model.clone(),
                    total_tokens_in: 0,
                    total_tokens_out: 0,
                    total_cost_cents: 0,
                    request_count: 0,
                });
            entry.total_tokens_in += record.tokens_in;
            entry.total_tokens_out += record.tokens_out;
            entry.total_cost_cents += record.cost_cents;
            entry.request_count += 1;
        }
        let mut rows: Vec<UsageSummary> = groups.into_values().collect();
        rows.sort_by(|a, b| {
            b.total_cost_cents
                .cmp(&a.total_cost_cents)
                .then_with(|| a.tool_name.cmp(&b.tool_name))
                .then_with(|| a.model.cmp(&b.model))
        });
        Ok(rows)
    }

    async fn list_api_keys(&self, user_id: UserId) -> StoreResult<Vec<ApiKey>> {
        let state = self.state.lock().await;
        let rows: Vec<ApiKey> = state
            .api_keys
            .iter()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |k| k.created_at))
    }

    async fn create_api_key(&self, key: NewApiKey) -> StoreResult<ApiKey> {
        let mut state = self.state.lock().await;
        if state.api_keys.iter().any(|k| k.key_hash == key.key_hash) {
            return Err(StoreError::Conflict("api_keys_key_hash_key".to_string()));
        }
        let created = ApiKey {
            id: ApiKeyId::new(),
            user_id: key.user_id,
            name: key.name,
            key_prefix: key.key_prefix,
            key_hash: key.key_hash,
            last_used_at: None,
            expires_at: key.expires_at,
            created_at: OffsetDateTime::now_utc(),
        };
        state.api_keys.push(created.clone());
        Ok(created)
    }

    async fn list_adapters(&self, user_id: UserId) -> StoreResult<Vec<LoraAdapter>> {
        let state = self.state.lock().await;
        let rows: Vec<LoraAdapter> = state
            .adapters
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |a| a.created_at))
    }

    async fn list_mcp_servers(&self, user_id: UserId) -> StoreResult<Vec<McpServer>> {
        let state = self.state.lock().await;
        let rows: Vec<McpServer> = state
            .servers
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |s| s.created_at))
    }

    async fn find_mcp_server(&self, key: &str) -> StoreResult<Option<McpServer>> {
        let state = self.state.lock().await;
        let id = uuid::Uuid::parse_str(key).ok().map(McpServerId::from);
        let by_id = state.servers.iter().find(|s| Some(s.id) == id);
        Ok(by_id
            .or_else(|| state.servers.iter().find(|s| s.slug == key))
            .cloned())
    }

    async fn find_mcp_server_by_id(&self, id: McpServerId) -> StoreResult<Option<McpServer>> {
        let state = self.state.lock().await;
        Ok(state.servers.iter().find(|s| s.id == id).cloned())
    }

    async fn create_mcp_server(&self, server: NewMcpServer) -> StoreResult<McpServer> {
        let mut state = self.state.lock().await;
        if state.servers.iter().any(|s| s.slug == server.slug) {
            return Err(StoreError::Conflict("mcp_servers_slug_key".to_string()));
        }
        let now = OffsetDateTime::now_utc();
        let created = McpServer {
            id: McpServerId::new(),
            user_id: server.user_id,
            slug: server.slug,
            name: server.name,
            upstream_base_url: server.upstream_base_url,
            enabled: true,
            created_at: now,
            updated_at: now,
        };
        state.servers.push(created.clone());
        Ok(created)
    }

    async fn update_mcp_server(
        &self,
        user_id: UserId,
        id: McpServerId,
        update: McpServerUpdate,
    ) -> StoreResult<Option<McpServer>> {
        let mut state = self.state.lock().await;
        if let Some(slug) = &update.slug {
            if state.servers.iter().any(|s| &s.slug == slug && s.id != id) {
                return Err(StoreError::Conflict("mcp_servers_slug_key".to_string()));
            }
        }
        let Some(server) = state
            .servers
            .iter_mut()
            .find(|s| s.id == id && s.user_id == user_id)
        else {
            return Ok(None);
        };
        if let Some(name) = update.name {
            server.name = name;
        }
        if let Some(slug) = update.slug {
            server.slug = slug;
        }
        if let Some(url) = update.upstream_base_url {
            server.upstream_base_url = url;
        }
        if let Some(enabled) = update.enabled {
            server.enabled = enabled;
        }
        server.updated_at = OffsetDateTime::now_utc();
        Ok(Some(server.clone()))
    }

    async fn delete_mcp_server(&self, user_id: UserId, id: McpServerId) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let before = state.servers.len();
        state
            .servers
            .retain(|s| !(s.id == id && s.user_id == user_id));
        Ok(state.servers.len() < before)
    }

    async fn record_trace(&self, record: NewTraceRecord) -> StoreResult<()> {
        self.state.lock().await.traces.push(StoredTrace {
            record,
            created_at: OffsetDateTime::now_utc(),
        });
        Ok(())
    }
}
