//! Direct tool-call endpoint for non-streaming clients

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use mcpgw_routing::{ModelRequest, RoutingResult};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::tools::GatewayTool;
use crate::trace::TraceContext;

#[derive(Debug, Serialize)]
pub struct DirectCallResponse {
    pub id: Uuid,
    pub tool: String,
    pub routing: RoutingResult,
    pub trace_id: String,
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
}

/// `POST /v1/mcp/:tool`
///
/// Account tools take the body as their arguments. Any other name, known or
/// not, is treated as a model-completion request and routed.
pub async fn call_tool(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(trace): Extension<TraceContext>,
    Path(tool_name): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    if let Some(tool) = GatewayTool::from_name(&tool_name).filter(|t| *t != GatewayTool::RouteModelRequest) {
        let arguments: Value = parse_body(&body)?;
        let result = state
            .tools
            .execute(tool, auth.user_id, arguments, &trace.trace_id)
            .await;
        return Ok(Json(result).into_response());
    }

    let request: ModelRequest = parse_body(&body)?;
    let routing = state
        .tools
        .route_model(auth.user_id, &request, &tool_name, &trace.trace_id)
        .await?;

    tracing::info!(
        user_id = %auth.user_id,
        tool = %tool_name,
        model = %routing.target_model,
        cost_cents = routing.estimated_cost_cents,
        cache_hit = routing.cache_hit,
        rate_limited = routing.rate_limited,
        "Direct call routed"
    );

    let status = if routing.rate_limited {
        StatusCode::TOO_MANY_REQUESTS
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(DirectCallResponse {
            id: Uuid::new_v4(),
            tool: tool_name,
            routing,
            trace_id: trace.trace_id,
        }),
    )
        .into_response())
}
