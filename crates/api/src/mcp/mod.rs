//! MCP relay
//!
//! Clients hold a long-lived SSE stream and post JSON-RPC messages alongside it.
//! Unbound streams talk to the gateway's own account tools; streams opened on
//! `/mcp/:server/sse` are bound to one registered upstream server and every
//! tool call is forwarded there.
//!
//! ```text
//! Client --POST /message--> Dispatcher --> Account tools / Routing engine
//!        <--SSE message---            \--> Upstream proxy --> {upstream}/message
//! ```

pub mod client;
pub mod dispatcher;
pub mod streaming;
pub mod types;

pub use client::{UpstreamError, UpstreamProxy};
pub use dispatcher::{DispatchContext, McpDispatcher, McpMethod};
pub use streaming::SessionEvent;
pub use types::{JsonRpcError, JsonRpcId, JsonRpcRequest, JsonRpcResponse};
