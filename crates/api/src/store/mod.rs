//! Account store: the persistent records gateway tools read and write

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use mcpgw_shared::{
    ApiKey, ApiKeyId, LoraAdapter, McpServer, McpServerId, NewTraceRecord, Project, StoreResult,
    UsageSummary, User, UserId,
};
use time::OffsetDateTime;

pub use memory::MemoryAccountStore;
pub use postgres::PgAccountStore;

#[derive(Debug, Clone)]
pub struct NewProject {
    pub user_id: UserId,
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
}

#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub user_id: UserId,
    pub name: String,
    pub key_prefix: String,
    pub key_hash: String,
    pub expires_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct NewMcpServer {
    pub user_id: UserId,
    pub slug: String,
    pub name: String,
    pub upstream_base_url: String,
}

/// Partial update; `None` fields are left unchanged
#[derive(Debug, Clone, Default)]
pub struct McpServerUpdate {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub upstream_base_url: Option<String>,
    pub enabled: Option<bool>,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Cheap connectivity check for health endpoints
    async fn ping(&self) -> StoreResult<()>;

    async fn find_api_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<ApiKey>>;
    async fn touch_api_key(&self, id: ApiKeyId, now: OffsetDateTime) -> StoreResult<()>;

    async fn get_user(&self, user_id: UserId) -> StoreResult<Option<User>>;

    async fn list_projects(&self, user_id: UserId) -> StoreResult<Vec<Project>>;
    async fn create_project(&self, project: NewProject) -> StoreResult<Project>;

    /// Per tool/model usage since `since`
    async fn usage_summary(
        &self,
        user_id: UserId,
        since: OffsetDateTime,
    ) -> StoreResult<Vec<UsageSummary>>;

    async fn list_api_keys(&self, user_id: UserId) -> StoreResult<Vec<ApiKey>>;
    async fn create_api_key(&self, key: NewApiKey) -> StoreResult<ApiKey>;

    async fn list_adapters(&self, user_id: UserId) -> StoreResult<Vec<LoraAdapter>>;

    async fn list_mcp_servers(&self, user_id: UserId) -> StoreResult<Vec<McpServer>>;
    /// Look up a server by id or slug, regardless of owner; an id match wins
    async fn find_mcp_server(&self, key: &str) -> StoreResult<Option<McpServer>>;
    async fn find_mcp_server_by_id(&self, id: McpServerId) -> StoreResult<Option<McpServer>>;
    async fn create_mcp_server(&self, server: NewMcpServer) -> StoreResult<McpServer>;
    /// Owner-scoped; `None` when no such server belongs to the user
    async fn update_mcp_server(
        &self,
        user_id: UserId,
        id: McpServerId,
        update: McpServerUpdate,
    ) -> StoreResult<Option<McpServer>>;
    /// Owner-scoped; `false` when nothing was deleted
    async fn delete_mcp_server(&self, user_id: UserId, id: McpServerId) -> StoreResult<bool>;

    async fn record_trace(&self, record: NewTraceRecord) -> StoreResult<()>;
}
