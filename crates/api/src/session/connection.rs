//! An open MCP session

use std::sync::Arc;

use mcpgw_shared::{McpServerId, UserId};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::mcp::streaming::SessionEvent;

/// Opaque session id: a v4 UUID in simple (32 hex) form
pub type SessionId = String;

/// Represents an open SSE session
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,

    /// Authenticated owner
    pub user_id: UserId,

    /// Upstream server this session proxies to, if opened on a per-server path
    pub bound_server_id: Option<McpServerId>,

    /// Channel to the session's SSE stream
    sender: mpsc::UnboundedSender<SessionEvent>,

    /// Held while a posted message is dispatched so replies keep receipt order
    dispatch_lock: Mutex<()>,
}

impl Session {
    pub fn new(
        user_id: UserId,
        bound_server_id: Option<McpServerId>,
        sender: mpsc::UnboundedSender<SessionEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4().simple().to_string(),
            user_id,
            bound_server_id,
            sender,
            dispatch_lock: Mutex::new(()),
        })
    }

    /// Queue an event on the stream. Returns false if the stream is gone.
    pub fn send(&self, event: SessionEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Wait for this session's turn to dispatch a message
    pub async fn lock_dispatch(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.dispatch_lock.lock().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mcp::types::{JsonRpcId, JsonRpcResponse};

    #[test]
    fn test_session_id_is_simple_uuid() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Session::new(UserId::new(), None, tx);
        assert_eq!(session.id.len(), 32);
        assert!(session.id.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(UserId::new(), None, tx);
        drop(rx);
        assert!(session.is_closed());
        let reply = JsonRpcResponse::success(Some(JsonRpcId::Number(1)), serde_json::json!({}));
        assert!(!session.send(SessionEvent::Message(reply)));
    }
}
