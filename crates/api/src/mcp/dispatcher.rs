//! JSON-RPC method dispatch for gateway sessions

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use mcpgw_shared::{McpServerId, UserId};
use serde_json::{json, Value};

use super::client::UpstreamProxy;
use super::types::*;
use crate::tools::{catalog, AccountToolExecutor, GatewayTool};
use crate::trace::TraceContext;

/// Name reported in `serverInfo`
pub const SERVER_NAME: &str = "mcp-gateway";

/// Methods the gateway understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpMethod {
    Initialize,
    Initialized,
    ToolsList,
    ToolsCall,
    Ping,
    Unknown(String),
}

impl McpMethod {
    pub fn parse(method: &str) -> Self {
        match method {
            "initialize" => McpMethod::Initialize,
            "initialized" | "notifications/initialized" => McpMethod::Initialized,
            "tools/list" => McpMethod::ToolsList,
            "tools/call" => McpMethod::ToolsCall,
            "ping" => McpMethod::Ping,
            other => McpMethod::Unknown(other.to_string()),
        }
    }
}

/// Who is calling, and through which stream
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub user_id: UserId,
    pub bound_server_id: Option<McpServerId>,
    pub trace: TraceContext,
}

pub struct McpDispatcher {
    tools: Arc<AccountToolExecutor>,
    proxy: Arc<UpstreamProxy>,
}

impl McpDispatcher {
    pub fn new(tools: Arc<AccountToolExecutor>, proxy: Arc<UpstreamProxy>) -> Self {
        Self { tools, proxy }
    }

    /// Handle one message. Requests always produce exactly one response,
    /// notifications never do.
    pub async fn dispatch(&self, ctx: &DispatchContext, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone();
        let method = request.method.clone();

        let outcome = AssertUnwindSafe(self.handle(ctx, request))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                tracing::error!(
                    user_id = %ctx.user_id,
                    trace_id = %ctx.trace.trace_id,
                    method = %method,
                    "Handler panicked while dispatching"
                );
                Err(JsonRpcError::internal_error("Internal error"))
            });

        // Notifications are executed for their effect only
        let id = id?;
        Some(match outcome {
            Ok(mut response) => {
                response.id = Some(id);
                response
            }
            Err(error) => JsonRpcResponse::error(Some(id), error),
        })
    }

    async fn handle(&self, ctx: &DispatchContext, request: JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        if request.jsonrpc != JSONRPC_VERSION {
            return Err(JsonRpcError::invalid_request("jsonrpc must be \"2.0\""));
        }

        let method = McpMethod::parse(&request.method);
        tracing::debug!(
            user_id = %ctx.user_id,
            trace_id = %ctx.trace.trace_id,
            method = %request.method,
            bound = ctx.bound_server_id.is_some(),
            "Dispatching MCP message"
        );

        match method {
            McpMethod::Initialize => Ok(JsonRpcResponse::success(request.id, initialize_result()?)),
            McpMethod::Initialized => Ok(JsonRpcResponse::success(request.id, json!({}))),
            McpMethod::Ping => Ok(JsonRpcResponse::success(request.id, json!({}))),
            McpMethod::ToolsList => match ctx.bound_server_id {
                Some(server_id) => Ok(self.proxy.proxy(ctx.user_id, server_id, &request, &ctx.trace).await),
                None => Ok(JsonRpcResponse::success(
                    request.id,
                    to_value(ToolsListResult { tools: catalog() })?,
                )),
            },
            McpMethod::ToolsCall => match ctx.bound_server_id {
                Some(server_id) => Ok(self.proxy.proxy(ctx.user_id, server_id, &request, &ctx.trace).await),
                None => self.call_gateway_tool(ctx, request).await,
            },
            McpMethod::Unknown(name) => Err(JsonRpcError::method_not_found(&name)),
        }
    }

    async fn call_gateway_tool(
        &self,
        ctx: &DispatchContext,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, JsonRpcError> {
        let params = request
            .params
            .ok_or_else(|| JsonRpcError::invalid_params("Missing params"))?;
        let params: ToolCallParams = serde_json::from_value(params)
            .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {}", e)))?;
        let tool = GatewayTool::from_name(&params.name)
            .ok_or_else(|| JsonRpcError::invalid_params(format!("Unknown tool: {}", params.name)))?;

        let result = self
            .tools
            .execute(tool, ctx.user_id, params.arguments, &ctx.trace.trace_id)
            .await;
        Ok(JsonRpcResponse::success(request.id, to_value(result)?))
    }
}

fn initialize_result() -> Result<Value, JsonRpcError> {
    to_value(InitializeResult {
        protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        capabilities: Capabilities {
            tools: Some(ToolsCapability { list_changed: false }),
        },
        server_info: ServerInfo {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    })
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryAccountStore;
    use mcpgw_routing::{MemoryRoutingStore, RoutingEngine};
    use mcpgw_shared::McpServer;
    use std::time::Duration;
    use time::OffsetDateTime;

    struct Fixture {
        dispatcher: McpDispatcher,
        store: Arc<MemoryAccountStore>,
        ctx: DispatchContext,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryAccountStore::new());
        let routing = Arc::new(
            RoutingEngine::new(Arc::new(MemoryRoutingStore::new())).with_sweep_probability(0.0),
        );
        let user = store.insert_user("alice", "alice@example.com").await;
        let tools = Arc::new(AccountToolExecutor::new(store.clone(), routing, "http://gateway.test"));
        let proxy = Arc::new(UpstreamProxy::new(store.clone(), Duration::from_secs(2)).unwrap());
        Fixture {
            dispatcher: McpDispatcher::new(tools, proxy),
            store,
            ctx: DispatchContext {
                user_id: user.id,
                bound_server_id: None,
                trace: TraceContext::new_root(),
            },
        }
    }

    fn request(id: i64, method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(Some(JsonRpcId::Number(id)), method, params)
    }

    #[test]
    fn test_method_parse() {
        assert_eq!(McpMethod::parse("tools/call"), McpMethod::ToolsCall);
        assert_eq!(McpMethod::parse("notifications/initialized"), McpMethod::Initialized);
        assert_eq!(
            McpMethod::parse("resources/list"),
            McpMethod::Unknown("resources/list".to_string())
        );
    }

    #[tokio::test]
    async fn test_initialize() {
        let f = fixture().await;
        let response = f
            .dispatcher
            .dispatch(&f.ctx, request(1, "initialize", Some(json!({}))))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
        assert_eq!(result["serverInfo"]["name"], "mcp-gateway");
        assert_eq!(response.id, Some(JsonRpcId::Number(1)));
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let f = fixture().await;
        for method in ["notifications/initialized", "initialized", "ping", "tools/list", "bogus"] {
            let notification = JsonRpcRequest::new(None, method, None);
            assert!(f.dispatcher.dispatch(&f.ctx, notification).await.is_none(), "{}", method);
        }
    }

    #[tokio::test]
    async fn test_every_request_gets_one_response_with_its_id() {
        let f = fixture().await;
        let cases = [
            ("initialize", None),
            ("ping", None),
            ("tools/list", None),
            ("tools/call", None),
            ("tools/call", Some(json!({"name": "nope"}))),
            ("resources/list", None),
        ];
        for (i, (method, params)) in cases.into_iter().enumerate() {
            let id = JsonRpcId::String(format!("req-{}", i));
            let response = f
                .dispatcher
                .dispatch(&f.ctx, JsonRpcRequest::new(Some(id.clone()), method, params))
                .await
                .unwrap();
            assert_eq!(response.id, Some(id));
            assert!(response.result.is_some() != response.error.is_some());
        }
    }

    #[tokio::test]
    async fn test_unknown_method_and_bad_params() {
        let f = fixture().await;
        let unknown = f
            .dispatcher
            .dispatch(&f.ctx, request(1, "resources/list", None))
            .await
            .unwrap();
        assert_eq!(unknown.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);

        let missing = f.dispatcher.dispatch(&f.ctx, request(2, "tools/call", None)).await.unwrap();
        assert_eq!(missing.error.unwrap().code, JsonRpcError::INVALID_PARAMS);

        let malformed = f
            .dispatcher
            .dispatch(&f.ctx, request(3, "tools/call", Some(json!({"arguments": {}}))))
            .await
            .unwrap();
        assert_eq!(malformed.error.unwrap().code, JsonRpcError::INVALID_PARAMS);

        let no_tool = f
            .dispatcher
            .dispatch(&f.ctx, request(4, "tools/call", Some(json!({"name": "launch_rocket"}))))
            .await
            .unwrap();
        assert_eq!(no_tool.error.unwrap().code, JsonRpcError::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_wrong_version_rejected() {
        let f = fixture().await;
        let mut req = request(1, "ping", None);
        req.jsonrpc = "1.0".to_string();
        let response = f.dispatcher.dispatch(&f.ctx, req).await.unwrap();
        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_unbound_tools_list_is_catalog() {
        let f = fixture().await;
        let response = f.dispatcher.dispatch(&f.ctx, request(1, "tools/list", None)).await.unwrap();
        let tools = response.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, GatewayTool::ALL.len());
    }

    #[tokio::test]
    async fn test_gateway_tool_call() {
        let f = fixture().await;
        let response = f
            .dispatcher
            .dispatch(
                &f.ctx,
                request(7, "tools/call", Some(json!({"name": "get_user_profile"}))),
            )
            .await
            .unwrap();
        let result: ToolCallResult = serde_json::from_value(response.result.unwrap()).unwrap();
        assert!(!result.is_error);
        assert!(result.text_content().contains("alice"));
    }

    #[tokio::test]
    async fn test_bound_session_to_disabled_server_is_not_found() {
        let mut f = fixture().await;
        let now = OffsetDateTime::now_utc();
        let server = McpServer {
            id: McpServerId::new(),
            user_id: f.ctx.user_id,
            slug: "off".to_string(),
            name: "Off".to_string(),
            upstream_base_url: "https://127.0.0.1:1".to_string(),
            enabled: false,
            created_at: now,
            updated_at: now,
        };
        f.store.insert_mcp_server(server.clone()).await;
        f.ctx.bound_server_id = Some(server.id);

        let response = f.dispatcher.dispatch(&f.ctx, request(9, "tools/list", None)).await.unwrap();
        assert_eq!(response.error.unwrap().code, JsonRpcError::UPSTREAM_NOT_FOUND);
        assert_eq!(response.id, Some(JsonRpcId::Number(9)));
    }
}
