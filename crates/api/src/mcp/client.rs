//! Upstream proxy: forwards JSON-RPC messages to user-registered MCP servers
//! over HTTP and normalizes whatever comes back into a JSON-RPC response.

use std::sync::Arc;
use std::time::Duration;

use mcpgw_shared::{McpServer, McpServerId, UserId};
use reqwest::{Client, StatusCode};
use serde_json::json;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use super::types::*;
use crate::store::AccountStore;
use crate::trace::{TraceContext, TRACEPARENT, TRACESTATE};

/// Total delivery attempts when the connection cannot be established
const MAX_ATTEMPTS: usize = 3;

/// Maximum backoff duration between attempts
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// Upstream bodies larger than this are discarded
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 8 * 1024 * 1024;

/// Error type for upstream proxy operations
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Covers missing, foreign and disabled servers alike
    #[error("Upstream server not found")]
    NotFound,

    #[error("Upstream request timed out")]
    Timeout,

    #[error("Upstream unreachable: {0}")]
    Unreachable(String),

    /// The upstream answered with a JSON-RPC error object but no valid envelope
    #[error("Upstream error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    #[error("Upstream returned HTTP {0}")]
    Http(u16),

    #[error("Upstream response exceeds {0} bytes")]
    TooLarge(usize),

    #[error("Store error: {0}")]
    Store(String),
}

impl UpstreamError {
    /// JSON-RPC error to send back to the caller
    pub fn to_json_rpc(&self) -> JsonRpcError {
        match self {
            UpstreamError::NotFound => JsonRpcError::upstream_not_found(),
            UpstreamError::Timeout => {
                JsonRpcError::new(JsonRpcError::UPSTREAM_ERROR, "Upstream request timed out")
            }
            UpstreamError::Unreachable(_) => {
                JsonRpcError::new(JsonRpcError::UPSTREAM_ERROR, "Upstream unreachable")
            }
            UpstreamError::Rpc(error) => error.clone(),
            UpstreamError::Http(status) => JsonRpcError::new(
                JsonRpcError::UPSTREAM_ERROR,
                format!("Upstream returned HTTP {}", status),
            )
            .with_data(json!({ "httpStatus": status })),
            UpstreamError::TooLarge(_) => {
                JsonRpcError::new(JsonRpcError::UPSTREAM_ERROR, "Upstream response too large")
            }
            UpstreamError::Store(_) => JsonRpcError::internal_error("Internal error"),
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Unreachable(err.to_string())
        }
    }
}

/// Parse response body handling both JSON and SSE (Server-Sent Events) formats.
/// Some servers answer with a single event: "event: message\ndata: {...}"
fn parse_response_body(body: &str) -> Option<JsonRpcResponse> {
    let trimmed = body.trim();

    if trimmed.starts_with("event:") || trimmed.starts_with("data:") {
        return trimmed
            .lines()
            .filter_map(|line| line.trim().strip_prefix("data:"))
            .map(str::trim)
            .find(|data| !data.is_empty())
            .and_then(|data| serde_json::from_str(data).ok());
    }

    serde_json::from_str(trimmed).ok()
}

fn is_valid_envelope(response: &JsonRpcResponse) -> bool {
    response.jsonrpc == JSONRPC_VERSION && (response.result.is_some() || response.error.is_some())
}

/// Turn an upstream HTTP answer into a JSON-RPC response or an error
fn normalize(status: StatusCode, body: &str) -> Result<JsonRpcResponse, UpstreamError> {
    let parsed = parse_response_body(body);

    match parsed {
        Some(response) if status.is_success() && is_valid_envelope(&response) => Ok(response),
        Some(JsonRpcResponse {
            error: Some(error), ..
        }) => Err(UpstreamError::Rpc(error)),
        _ => Err(UpstreamError::Http(status.as_u16())),
    }
}

/// Forwards JSON-RPC traffic to registered upstream MCP servers
pub struct UpstreamProxy {
    http_client: Client,
    store: Arc<dyn AccountStore>,
    max_response_bytes: usize,
}

impl UpstreamProxy {
    pub fn new(store: Arc<dyn AccountStore>, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(10)
            .build()?;
        Ok(Self {
            http_client,
            store,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        })
    }

    pub fn with_max_response_bytes(mut self, max_response_bytes: usize) -> Self {
        self.max_response_bytes = max_response_bytes;
        self
    }

    /// Find a server by id or slug that `user_id` owns and has enabled.
    ///
    /// Every failure is reported as [`UpstreamError::NotFound`], so other
    /// users' servers are indistinguishable from missing ones.
    pub async fn resolve(&self, user_id: UserId, key: &str) -> Result<McpServer, UpstreamError> {
        let server = self.store.find_mcp_server(key).await.map_err(|e| {
            tracing::error!(server = %key, error = %e, "Failed to look up upstream server");
            UpstreamError::Store(e.to_string())
        })?;
        Self::available_to(user_id, server)
    }

    /// Like [`resolve`](Self::resolve), but by id only; slugs never match
    pub async fn resolve_id(&self, user_id: UserId, id: McpServerId) -> Result<McpServer, UpstreamError> {
        let server = self.store.find_mcp_server_by_id(id).await.map_err(|e| {
            tracing::error!(server_id = %id, error = %e, "Failed to look up upstream server");
            UpstreamError::Store(e.to_string())
        })?;
        Self::available_to(user_id, server)
    }

    fn available_to(user_id: UserId, server: Option<McpServer>) -> Result<McpServer, UpstreamError> {
        match server {
            Some(server) if server.user_id == user_id && server.enabled => Ok(server),
            Some(server) => {
                tracing::debug!(
                    user_id = %user_id,
                    server_id = %server.id,
                    enabled = server.enabled,
                    "Upstream server not available to caller"
                );
                Err(UpstreamError::NotFound)
            }
            None => Err(UpstreamError::NotFound),
        }
    }

    /// POST `request` to `{upstream_base_url}/message` and normalize the answer.
    /// The client's original JSON is sent when available. The returned
    /// response carries the caller's request id.
    pub async fn forward(
        &self,
        server: &McpServer,
        request: &JsonRpcRequest,
        trace: &TraceContext,
    ) -> Result<JsonRpcResponse, UpstreamError> {
        let url = format!("{}/message", server.upstream_base_url.trim_end_matches('/'));
        let hop = trace.child();

        // Only failures to connect are retried; the request never left
        let retry_strategy = ExponentialBackoff::from_millis(2)
            .factor(50)
            .max_delay(RETRY_MAX_DELAY)
            .map(jitter)
            .take(MAX_ATTEMPTS - 1);

        let response = Retry::spawn(retry_strategy, || async {
            let mut req_builder = self
                .http_client
                .post(&url)
                .header("Accept", "application/json, text/event-stream")
                .header(TRACEPARENT, hop.traceparent());
            if !hop.tracestate.is_empty() {
                req_builder = req_builder.header(TRACESTATE, hop.tracestate.as_str());
            }

            req_builder = match &request.raw {
                Some(raw) => req_builder.json(raw),
                None => req_builder.json(request),
            };

            match req_builder.send().await {
                Ok(response) => Ok(Ok(response)),
                Err(e) if e.is_connect() => {
                    tracing::debug!(server_id = %server.id, error = %e, "Connect failed - will retry");
                    Err(e)
                }
                Err(e) => Ok(Err(e)), // Return error wrapped in Ok to stop retrying
            }
        })
        .await
        .and_then(|result| result)
        .map_err(|e| {
            tracing::warn!(server_id = %server.id, url = %url, error = %e, "Upstream request failed");
            UpstreamError::from(e)
        })?;

        let status = response.status();
        let body = self.read_body(server, response).await?;

        let mut normalized = normalize(status, &body).inspect_err(|e| {
            tracing::warn!(
                server_id = %server.id,
                status = status.as_u16(),
                error = %e,
                "Upstream returned an unusable response"
            );
        })?;
        normalized.id = request.id.clone();
        Ok(normalized)
    }

    /// Read at most `max_response_bytes` of the body
    async fn read_body(
        &self,
        server: &McpServer,
        mut response: reqwest::Response,
    ) -> Result<String, UpstreamError> {
        let limit = self.max_response_bytes;
        let too_large = || {
            tracing::warn!(server_id = %server.id, limit, "Upstream response too large");
            UpstreamError::TooLarge(limit)
        };

        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(too_large());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Resolve the session's bound server and forward, always producing a reply
    pub async fn proxy(
        &self,
        user_id: UserId,
        server_id: McpServerId,
        request: &JsonRpcRequest,
        trace: &TraceContext,
    ) -> JsonRpcResponse {
        let outcome = match self.resolve_id(user_id, server_id).await {
            Ok(server) => self.forward(&server, request, trace).await,
            Err(e) => Err(e),
        };

        outcome.unwrap_or_else(|e| JsonRpcResponse::error(request.id.clone(), e.to_json_rpc()))
    }
}
