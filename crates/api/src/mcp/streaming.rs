//! SSE events pushed to an open MCP session

use axum::response::sse::Event;
use serde_json::json;

use super::types::{JsonRpcNotification, JsonRpcResponse};

/// SSE event name for every JSON-RPC frame
pub const MESSAGE_EVENT: &str = "message";

/// Frames delivered through a session's sender
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// First frame: where to POST further messages
    Endpoint(JsonRpcNotification),
    /// Reply to a posted request
    Message(JsonRpcResponse),
}

impl SessionEvent {
    pub fn endpoint(url: impl Into<String>) -> Self {
        SessionEvent::Endpoint(JsonRpcNotification::new(
            "endpoint",
            Some(json!({ "endpoint": url.into() })),
        ))
    }

    /// Convert event to SSE data string
    pub fn to_sse_data(&self) -> String {
        match self {
            SessionEvent::Endpoint(notification) => serde_json::to_string(notification),
            SessionEvent::Message(response) => serde_json::to_string(response),
        }
        .unwrap_or_default()
    }

    pub fn to_sse_event(&self) -> Event {
        Event::default().event(MESSAGE_EVENT).data(self.to_sse_data())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mcp::types::JsonRpcId;

    #[test]
    fn test_endpoint_frame_is_a_notification() {
        let event = SessionEvent::endpoint("http://gateway.test/message?session_id=abc");
        let value: serde_json::Value = serde_json::from_str(&event.to_sse_data()).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "endpoint");
        assert_eq!(
            value["params"]["endpoint"],
            "http://gateway.test/message?session_id=abc"
        );
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_message_frame_carries_response() {
        let event = SessionEvent::Message(JsonRpcResponse::success(
            Some(JsonRpcId::Number(7)),
            json!({}),
        ));
        let value: serde_json::Value = serde_json::from_str(&event.to_sse_data()).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["result"], json!({}));
    }
}
