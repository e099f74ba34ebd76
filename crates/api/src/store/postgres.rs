//! Postgres-backed account store

use async_trait::async_trait;
use mcpgw_shared::{
    ApiKey, ApiKeyId, LoraAdapter, McpServer, McpServerId, NewTraceRecord, Project, ProjectId,
    StoreResult, UsageSummary, User, UserId,
};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{AccountStore, McpServerUpdate, NewApiKey, NewMcpServer, NewProject};

const API_KEY_COLUMNS: &str =
    "id, user_id, name, key_prefix, key_hash, last_used_at, expires_at, created_at";
const MCP_SERVER_COLUMNS: &str =
    "id, user_id, slug, name, upstream_base_url, enabled, created_at, updated_at";

#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_api_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<ApiKey>> {
        let keys: Vec<ApiKey> = sqlx::query_as(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_prefix = $1"
        ))
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    async fn touch_api_key(&self, id: ApiKeyId, now: OffsetDateTime) -> StoreResult<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_user(&self, user_id: UserId) -> StoreResult<Option<User>> {
        let user: Option<User> = sqlx::query_as(
            "SELECT id, username, email, display_name, avatar_url, created_at
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn list_projects(&self, user_id: UserId) -> StoreResult<Vec<Project>> {
        let projects: Vec<Project> = sqlx::query_as(
            "SELECT id, user_id, name, description, is_public, created_at
             FROM projects WHERE user_id = $1
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(projects)
    }

    async fn create_project(&self, project: NewProject) -> StoreResult<Project> {
        let created: Project = sqlx::query_as(
            "INSERT INTO projects (id, user_id, name, description, is_public)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, user_id, name, description, is_public, created_at",
        )
        .bind(ProjectId::new())
        .bind(project.user_id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.is_public)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn usage_summary(
        &self,
        user_id: UserId,
        since: OffsetDateTime,
    ) -> StoreResult<Vec<UsageSummary>> {
        let rows: Vec<UsageSummary> = sqlx::query_as(
            "SELECT tool_name, model,
                    COALESCE(SUM(tokens_in), 0)::BIGINT AS total_tokens_in,
                    COALESCE(SUM(tokens_out), 0)::BIGINT AS total_tokens_out,
                    COALESCE(SUM(cost_cents), 0)::BIGINT AS total_cost_cents,
                    COUNT(*) AS request_count
             FROM traces
             WHERE user_id = $1 AND created_at >= $2
             GROUP BY tool_name, model
             ORDER BY total_cost_cents DESC, tool_name, model",
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_api_keys(&self, user_id: UserId) -> StoreResult<Vec<ApiKey>> {
        let keys: Vec<ApiKey> = sqlx::query_as(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    async fn create_api_key(&self, key: NewApiKey) -> StoreResult<ApiKey> {
        let created: ApiKey = sqlx::query_as(&format!(
            "INSERT INTO api_keys (id, user_id, name, key_prefix, key_hash, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {API_KEY_COLUMNS}"
        ))
        .bind(ApiKeyId::new())
        .bind(key.user_id)
        .bind(&key.name)
        .bind(&key.key_prefix)
        .bind(&key.key_hash)
        .bind(key.expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn list_adapters(&self, user_id: UserId) -> StoreResult<Vec<LoraAdapter>> {
        let adapters: Vec<LoraAdapter> = sqlx::query_as(
            "SELECT id, user_id, project_id, name, model_base, storage_path, metadata, created_at
             FROM lora_adapters WHERE user_id = $1
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(adapters)
    }

    async fn list_mcp_servers(&self, user_id: UserId) -> StoreResult<Vec<McpServer>> {
        let servers: Vec<McpServer> = sqlx::query_as(&format!(
            "SELECT {MCP_SERVER_COLUMNS} FROM mcp_servers WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(servers)
    }

    async fn find_mcp_server(&self, key: &str) -> StoreResult<Option<McpServer>> {
        // An id match wins over a slug match
        let id = Uuid::parse_str(key).ok();
        let server: Option<McpServer> = sqlx::query_as(&format!(
            "SELECT {MCP_SERVER_COLUMNS} FROM mcp_servers
             WHERE slug = $1 OR ($2::uuid IS NOT NULL AND id = $2)
             ORDER BY (id = $2) DESC NULLS LAST
             LIMIT 1"
        ))
        .bind(key)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(server)
    }

    async fn find_mcp_server_by_id(&self, id: McpServerId) -> StoreResult<Option<McpServer>> {
        let server: Option<McpServer> = sqlx::query_as(&format!(
            "SELECT {MCP_SERVER_COLUMNS} FROM mcp_servers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(server)
    }

    async fn create_mcp_server(&self, server: NewMcpServer) -> StoreResult<McpServer> {
        let created: McpServer = sqlx::query_as(&format!(
            "INSERT INTO mcp_servers (id, user_id, slug, name, upstream_base_url)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {MCP_SERVER_COLUMNS}"
        ))
        .bind(McpServerId::new())
        .bind(server.user_id)
        .bind(&server.slug)
        .bind(&server.name)
        .bind(&server.upstream_base_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn update_mcp_server(
        &self,
        user_id: UserId,
        id: McpServerId,
        update: McpServerUpdate,
    ) -> StoreResult<Option<McpServer>> {
        let updated: Option<McpServer> = sqlx::query_as(&format!(
            "UPDATE mcp_servers SET
                 name = COALESCE($3, name),
                 slug = COALESCE($4, slug),
                 upstream_base_url = COALESCE($5, upstream_base_url),
                 enabled = COALESCE($6, enabled),
                 updated_at = NOW()
             WHERE id = $1 AND user_id = $2
             RETURNING {MCP_SERVER_COLUMNS}"
        ))
        .bind(id)
        .bind(user_id)
        .bind(update.name)
        .bind(update.slug)
        .bind(update.upstream_base_url)
        .bind(update.enabled)
        .fetch_optional(&self.pool)
        .await?;
        Ok(updated)
    }

    async fn delete_mcp_server(&self, user_id: UserId, id: McpServerId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM mcp_servers WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_trace(&self, record: NewTraceRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO traces (id, user_id, trace_id, tool_name, model, tokens_in, tokens_out,
                                 cost_cents, duration_ms, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(Uuid::new_v4())
        .bind(record.user_id)
        .bind(&record.trace_id)
        .bind(&record.tool_name)
        .bind(&record.model)
        .bind(record.tokens_in)
        .bind(record.tokens_out)
        .bind(record.cost_cents)
        .bind(record.duration_ms)
        .bind(record.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
