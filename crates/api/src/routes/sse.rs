//! SSE relay: stream open and message post

use std::convert::Infallible;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Extension, Json,
};
use futures::{Stream, StreamExt};
use mcpgw_shared::{McpServerId, UserId};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::mcp::{DispatchContext, JsonRpcRequest, SessionEvent, UpstreamError};
use crate::state::AppState;
use crate::trace::TraceContext;

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

/// `GET /sse`: open an unbound session on the gateway's own tools
pub async fn open_stream(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let message_url = format!("{}/message", state.config.public_url);
    session_stream(&state, auth.user_id, None, &message_url)
}

/// `GET /mcp/:server/sse`: open a session bound to one registered server
pub async fn open_server_stream(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(server_key): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let server = state.proxy.resolve(auth.user_id, &server_key).await?;
    let message_url = format!("{}/mcp/{}/message", state.config.public_url, server.slug);
    Ok(session_stream(&state, auth.user_id, Some(server.id), &message_url))
}

/// Register a session and turn its receiver into an SSE stream. The first
/// event tells the client where to post. Dropping the stream closes the session.
fn session_stream(
    state: &AppState,
    user_id: UserId,
    bound_server_id: Option<McpServerId>,
    message_url: &str,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (session, receiver) = state.sessions.open(user_id, bound_server_id);
    let guard = state.sessions.guard(session.id.clone());
    session.send(SessionEvent::endpoint(format!(
        "{}?session_id={}",
        message_url, session.id
    )));

    let events = futures::stream::unfold(
        (UnboundedReceiverStream::new(receiver), guard),
        |(mut receiver, guard)| async move {
            let event = receiver.next().await?;
            Some((Ok(event.to_sse_event()), (receiver, guard)))
        },
    );

    Sse::new(events).keep_alive(KeepAlive::new().interval(state.config.sse_keepalive()))
}

/// `POST /message?session_id=`
pub async fn post_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(trace): Extension<TraceContext>,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    deliver(&state, auth, trace, None, query, &body).await
}

/// `POST /mcp/:server/message?session_id=`
pub async fn post_server_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(trace): Extension<TraceContext>,
    Path(server_key): Path<String>,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let server = state
        .proxy
        .resolve(auth.user_id, &server_key)
        .await
        .map_err(|e| match e {
            UpstreamError::NotFound => ApiError::SessionNotFound,
            other => other.into(),
        })?;
    deliver(&state, auth, trace, Some(server.id), query, &body).await
}

async fn deliver(
    state: &AppState,
    auth: AuthUser,
    trace: TraceContext,
    expected_server: Option<McpServerId>,
    query: SessionQuery,
    body: &[u8],
) -> ApiResult<Json<Value>> {
    let session_id = query
        .session_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("session_id is required".to_string()))?;
    let request = JsonRpcRequest::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Malformed JSON-RPC message: {}", e)))?;

    let session = state
        .sessions
        .lookup(&session_id)
        .filter(|s| s.user_id == auth.user_id && s.bound_server_id == expected_server)
        .ok_or(ApiError::SessionNotFound)?;

    let ctx = DispatchContext {
        user_id: auth.user_id,
        bound_server_id: session.bound_server_id,
        trace,
    };

    // Replies for one session leave in the order their posts arrived
    let _order = session.lock_dispatch().await;
    if let Some(reply) = state.dispatcher.dispatch(&ctx, request).await {
        if !session.send(SessionEvent::Message(reply)) {
            tracing::debug!(session_id = %session.id, "Stream closed before reply; discarded");
        }
    }

    Ok(Json(json!({ "ok": true })))
}
