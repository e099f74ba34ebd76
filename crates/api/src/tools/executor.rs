//! Account tool executor

use std::sync::Arc;
use std::time::Instant;

use mcpgw_routing::{ModelRequest, RoutingEngine, RoutingError, RoutingResult};
use mcpgw_shared::{McpServer, McpServerId, NewTraceRecord, StoreError, TraceStatus, UserId};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use super::GatewayTool;
use crate::auth::generate_key;
use crate::mcp::types::ToolCallResult;
use crate::store::{AccountStore, McpServerUpdate, NewApiKey, NewMcpServer, NewProject};

/// Maximum slug length
const MAX_SLUG_LEN: usize = 48;

/// Reporting window for `get_usage`
const USAGE_WINDOW_DAYS: i64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Not found")]
    NotFound,

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Internal error")]
    Store(#[from] StoreError),
}

impl From<RoutingError> for ToolError {
    fn from(err: RoutingError) -> Self {
        match err {
            RoutingError::Store(e) => ToolError::Store(e),
        }
    }
}

impl ToolError {
    /// Message shown to the caller; store failures carry no detail
    pub fn user_message(&self) -> String {
        match self {
            ToolError::Store(StoreError::Conflict(_)) => "Already exists".to_string(),
            ToolError::Store(StoreError::NotFound) => "Not found".to_string(),
            other => other.to_string(),
        }
    }
}

/// Lowercase, map anything outside `[a-z0-9]` to `-`, collapse and trim dashes
pub fn sanitize_slug(raw: &str) -> Option<String> {
    let mut slug = String::with_capacity(raw.len());
    for c in raw.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug: String = slug.trim_matches('-').chars().take(MAX_SLUG_LEN).collect();
    let slug = slug.trim_end_matches('-').to_string();
    (!slug.is_empty()).then_some(slug)
}

/// Sanitize a requested slug; slugs share the `/mcp/{key}` path with server ids,
/// so UUID-shaped values are refused
fn checked_slug(raw: &str) -> Result<String, ToolError> {
    let slug = sanitize_slug(raw)
        .ok_or_else(|| ToolError::InvalidArguments("slug must contain letters or digits".into()))?;
    if uuid::Uuid::parse_str(&slug).is_ok() {
        return Err(ToolError::InvalidArguments("slug must not be a UUID".into()));
    }
    Ok(slug)
}

/// Accept only absolute https URLs with a host; strip any trailing slash
pub fn validate_upstream_url(raw: &str) -> Result<String, ToolError> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|_| ToolError::InvalidArguments("upstream_base_url is not a valid URL".into()))?;
    if parsed.scheme() != "https" {
        return Err(ToolError::InvalidArguments("upstream_base_url must use https".into()));
    }
    if parsed.host_str().filter(|host| !host.is_empty()).is_none() {
        return Err(ToolError::InvalidArguments("upstream_base_url must include a host".into()));
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    let arguments = if arguments.is_null() { json!({}) } else { arguments };
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

fn parse_server_id(raw: &str) -> Result<McpServerId, ToolError> {
    uuid::Uuid::parse_str(raw.trim())
        .map(McpServerId::from)
        .map_err(|_| ToolError::InvalidArguments("id must be a UUID".into()))
}

fn required_text(field: &str, value: Option<String>) -> Result<String, ToolError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("{} is required", field)))
}

#[derive(Deserialize)]
struct CreateProjectArgs {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    is_public: bool,
}

#[derive(Deserialize)]
struct CreateApiKeyArgs {
    name: Option<String>,
    expires_at: Option<String>,
}

#[derive(Deserialize)]
struct CreateMcpServerArgs {
    name: Option<String>,
    upstream_base_url: Option<String>,
    slug: Option<String>,
}

#[derive(Deserialize)]
struct UpdateMcpServerArgs {
    id: String,
    name: Option<String>,
    slug: Option<String>,
    upstream_base_url: Option<String>,
    enabled: Option<bool>,
}

#[derive(Deserialize)]
struct ServerIdArgs {
    id: String,
}

/// Runs gateway tools on behalf of an authenticated user
pub struct AccountToolExecutor {
    store: Arc<dyn AccountStore>,
    routing: Arc<RoutingEngine>,
    public_url: String,
}

impl AccountToolExecutor {
    pub fn new(store: Arc<dyn AccountStore>, routing: Arc<RoutingEngine>, public_url: impl Into<String>) -> Self {
        Self {
            store,
            routing,
            public_url: public_url.into(),
        }
    }

    /// Run `tool` and wrap the outcome as a tool result
    pub async fn execute(
        &self,
        tool: GatewayTool,
        user_id: UserId,
        arguments: Value,
        trace_id: &str,
    ) -> ToolCallResult {
        match self.run(tool, user_id, arguments, trace_id).await {
            Ok(value) => ToolCallResult::json(&value),
            Err(e) => {
                match &e {
                    ToolError::Store(StoreError::Conflict(_) | StoreError::NotFound) => {}
                    ToolError::Store(store_err) => tracing::error!(
                        tool = tool.name(),
                        user_id = %user_id,
                        error = %store_err,
                        "Tool store operation failed"
                    ),
                    _ => tracing::debug!(tool = tool.name(), error = %e, "Tool call rejected"),
                }
                ToolCallResult::failure(e.user_message())
            }
        }
    }

    async fn run(
        &self,
        tool: GatewayTool,
        user_id: UserId,
        arguments: Value,
        trace_id: &str,
    ) -> Result<Value, ToolError> {
        match tool {
            GatewayTool::GetUserProfile => self.get_user_profile(user_id).await,
            GatewayTool::ListProjects => to_value(self.store.list_projects(user_id).await?),
            GatewayTool::CreateProject => self.create_project(user_id, parse_args(arguments)?).await,
            GatewayTool::GetUsage => self.get_usage(user_id).await,
            GatewayTool::ListApiKeys => to_value(self.store.list_api_keys(user_id).await?),
            GatewayTool::CreateApiKey => self.create_api_key(user_id, parse_args(arguments)?).await,
            GatewayTool::ListAdapters => to_value(self.store.list_adapters(user_id).await?),
            GatewayTool::ListMcpServers => self.list_mcp_servers(user_id).await,
            GatewayTool::CreateMcpServer => {
                self.create_mcp_server(user_id, parse_args(arguments)?).await
            }
            GatewayTool::UpdateMcpServer => {
                self.update_mcp_server(user_id, parse_args(arguments)?).await
            }
            GatewayTool::DeleteMcpServer => {
                self.delete_mcp_server(user_id, parse_args(arguments)?).await
            }
            GatewayTool::RouteModelRequest => {
                let request: ModelRequest = parse_args(arguments)?;
                let routing = self
                    .route_model(user_id, &request, tool.name(), trace_id)
                    .await?;
                to_value(routing)
            }
        }
    }

    /// Route and settle a completion request, then record the call
    pub async fn route_model(
        &self,
        user_id: UserId,
        request: &ModelRequest,
        tool_name: &str,
        trace_id: &str,
    ) -> Result<RoutingResult, ToolError> {
        let started = Instant::now();
        let routed = self.routing.route(request, user_id).await?;
        let result = self.routing.settle(user_id, &routed).await?.apply(routed);

        let status = if result.rate_limited {
            TraceStatus::RateLimited
        } else if result.cache_hit {
            TraceStatus::Cached
        } else {
            TraceStatus::Success
        };
        let record = NewTraceRecord {
            user_id,
            trace_id: trace_id.to_string(),
            tool_name: tool_name.to_string(),
            model: result.target_model.clone(),
            tokens_in: i64::try_from(request.estimated_input_tokens()).unwrap_or(i64::MAX),
            tokens_out: i64::try_from(request.estimated_output_tokens()).unwrap_or(i64::MAX),
            cost_cents: result.estimated_cost_cents,
            duration_ms: i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX),
            status,
        };
        if let Err(e) = self.store.record_trace(record).await {
            tracing::warn!(user_id = %user_id, trace_id = %trace_id, error = %e, "Failed to record trace");
        }

        Ok(result)
    }

    async fn get_user_profile(&self, user_id: UserId) -> Result<Value, ToolError> {
        let user = self.store.get_user(user_id).await?.ok_or(ToolError::NotFound)?;
        to_value(user)
    }

    async fn create_project(&self, user_id: UserId, args: CreateProjectArgs) -> Result<Value, ToolError> {
        let name = required_text("name", args.name)?;
        let project = self
            .store
            .create_project(NewProject {
                user_id,
                name,
                description: args.description.filter(|d| !d.trim().is_empty()),
                is_public: args.is_public,
            })
            .await?;
        tracing::info!(user_id = %user_id, project_id = %project.id, "Project created");
        to_value(project)
    }

    async fn get_usage(&self, user_id: UserId) -> Result<Value, ToolError> {
        let budget = self.routing.budget(user_id).await?;
        let since = OffsetDateTime::now_utc() - Duration::days(USAGE_WINDOW_DAYS);
        let usage = self.store.usage_summary(user_id, since).await?;
        Ok(json!({
            "budget": budget,
            "remaining_cents": budget.remaining_cents().max(0),
            "period_days": USAGE_WINDOW_DAYS,
            "usage": usage,
        }))
    }

    async fn create_api_key(&self, user_id: UserId, args: CreateApiKeyArgs) -> Result<Value, ToolError> {
        let expires_at = args
            .expires_at
            .as_deref()
            .map(|raw| {
                OffsetDateTime::parse(raw.trim(), &Rfc3339).map_err(|_| {
                    ToolError::InvalidArguments("expires_at must be an RFC 3339 timestamp".into())
                })
            })
            .transpose()?;

        let generated = generate_key();
        let key = self
            .store
            .create_api_key(NewApiKey {
                user_id,
                name: args
                    .name
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| "MCP key".to_string()),
                key_prefix: generated.prefix,
                key_hash: generated.hash,
                expires_at,
            })
            .await?;
        tracing::info!(user_id = %user_id, api_key_id = %key.id, "API key created");

        Ok(json!({
            "api_key": key,
            "key": generated.plaintext,
            "warning": "Store this key now. It will not be shown again.",
        }))
    }

    fn with_gateway_url(&self, server: &McpServer) -> Result<Value, ToolError> {
        let mut value = to_value(server)?;
        if let Value::Object(map) = &mut value {
            map.insert(
                "gateway_url".to_string(),
                Value::String(format!("{}/mcp/{}/sse", self.public_url, server.slug)),
            );
        }
        Ok(value)
    }

    async fn list_mcp_servers(&self, user_id: UserId) -> Result<Value, ToolError> {
        let servers = self.store.list_mcp_servers(user_id).await?;
        let servers = servers
            .iter()
            .map(|server| self.with_gateway_url(server))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Array(servers))
    }

    async fn create_mcp_server(&self, user_id: UserId, args: CreateMcpServerArgs) -> Result<Value, ToolError> {
        let name = required_text("name", args.name)?;
        let upstream_base_url =
            validate_upstream_url(&required_text("upstream_base_url", args.upstream_base_url)?)?;
        let slug = checked_slug(args.slug.as_deref().unwrap_or(&name))?;

        let server = self
            .store
            .create_mcp_server(NewMcpServer {
                user_id,
                slug: slug.clone(),
                name,
                upstream_base_url,
            })
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => ToolError::Conflict(format!("slug '{}' is taken", slug)),
                other => other.into(),
            })?;
        tracing::info!(user_id = %user_id, server_id = %server.id, slug = %server.slug, "Upstream server registered");
        self.with_gateway_url(&server)
    }

    async fn update_mcp_server(&self, user_id: UserId, args: UpdateMcpServerArgs) -> Result<Value, ToolError> {
        let id = parse_server_id(&args.id)?;
        let name = match args.name {
            Some(name) => Some(required_text("name", Some(name))?),
            None => None,
        };
        let slug = args.slug.as_deref().map(checked_slug).transpose()?;
        let upstream_base_url = args
            .upstream_base_url
            .as_deref()
            .map(validate_upstream_url)
            .transpose()?;

        let update = McpServerUpdate {
            name,
            slug: slug.clone(),
            upstream_base_url,
            enabled: args.enabled,
        };
        let server = self
            .store
            .update_mcp_server(user_id, id, update)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => ToolError::Conflict(format!(
                    "slug '{}' is taken",
                    slug.as_deref().unwrap_or_default()
                )),
                other => other.into(),
            })?
            .ok_or(ToolError::NotFound)?;
        tracing::info!(user_id = %user_id, server_id = %server.id, "Upstream server updated");
        self.with_gateway_url(&server)
    }

    async fn delete_mcp_server(&self, user_id: UserId, args: ServerIdArgs) -> Result<Value, ToolError> {
        let id = parse_server_id(&args.id)?;
        if !self.store.delete_mcp_server(user_id, id).await? {
            return Err(ToolError::NotFound);
        }
        tracing::info!(user_id = %user_id, server_id = %id, "Upstream server deleted");
        Ok(json!({ "deleted": true, "id": id }))
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
