//! Concurrent registry of open sessions

use std::sync::Arc;

use dashmap::DashMap;
use mcpgw_shared::{McpServerId, UserId};
use tokio::sync::mpsc;

use super::connection::Session;
use crate::mcp::streaming::SessionEvent;

/// All open sessions indexed by id
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session and return it with the receiving end of its stream
    pub fn open(
        &self,
        user_id: UserId,
        bound_server_id: Option<McpServerId>,
    ) -> (Arc<Session>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(user_id, bound_server_id, tx);
        self.sessions.insert(session.id.clone(), Arc::clone(&session));

        tracing::info!(
            session_id = %session.id,
            user_id = %user_id,
            bound_server_id = ?bound_server_id.map(|id| id.to_string()),
            total_sessions = self.sessions.len(),
            "MCP session opened"
        );

        (session, rx)
    }

    pub fn lookup(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a session. Closing an unknown or already closed session is a no-op.
    pub fn close(&self, session_id: &str) {
        if let Some((_, session)) = self.sessions.remove(session_id) {
            tracing::info!(
                session_id = %session_id,
                user_id = %session.user_id,
                remaining_sessions = self.sessions.len(),
                "MCP session closed"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Guard that closes `session_id` when dropped
    pub fn guard(&self, session_id: impl Into<String>) -> SessionGuard {
        SessionGuard {
            registry: self.clone(),
            session_id: session_id.into(),
        }
    }
}

/// Deregisters its session on drop. Owned by the SSE stream, so a client
/// disconnect removes the session synchronously.
pub struct SessionGuard {
    registry: SessionRegistry,
    session_id: String,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.close(&self.session_id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_open_lookup_close() {
        let registry = SessionRegistry::new();
        let user = UserId::new();
        let (session, _rx) = registry.open(user, None);

        let found = registry.lookup(&session.id).unwrap();
        assert_eq!(found.user_id, user);
        assert_eq!(registry.len(), 1);

        registry.close(&session.id);
        assert!(registry.lookup(&session.id).is_none());
        // idempotent
        registry.close(&session.id);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_session() {
        let registry = SessionRegistry::new();
        assert!(registry.lookup("does-not-exist").is_none());
    }

    #[test]
    fn test_guard_closes_on_drop() {
        let registry = SessionRegistry::new();
        let (session, _rx) = registry.open(UserId::new(), Some(McpServerId::new()));
        let guard = registry.guard(session.id.clone());
        assert_eq!(guard.session_id(), session.id);
        assert_eq!(registry.len(), 1);
        drop(guard);
        assert!(registry.lookup(&session.id).is_none());
    }

    #[test]
    fn test_concurrent_open_and_close() {
        let registry = SessionRegistry::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let (session, _rx) = registry.open(UserId::new(), None);
                        assert!(registry.lookup(&session.id).is_some());
                        registry.close(&session.id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
