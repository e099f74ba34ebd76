//! Gateway account tools
//!
//! A closed set of tools served by the gateway itself. Each is a thin,
//! user-scoped read or write against the account store, except
//! `route_model_request` which goes through the routing engine.

pub mod executor;

use serde_json::{json, Value};

use crate::mcp::types::Tool;

pub use executor::{AccountToolExecutor, ToolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayTool {
    GetUserProfile,
    ListProjects,
    CreateProject,
    GetUsage,
    ListApiKeys,
    CreateApiKey,
    ListAdapters,
    ListMcpServers,
    CreateMcpServer,
    UpdateMcpServer,
    DeleteMcpServer,
    RouteModelRequest,
}

impl GatewayTool {
    pub const ALL: [GatewayTool; 12] = [
        GatewayTool::GetUserProfile,
        GatewayTool::ListProjects,
        GatewayTool::CreateProject,
        GatewayTool::GetUsage,
        GatewayTool::ListApiKeys,
        GatewayTool::CreateApiKey,
        GatewayTool::ListAdapters,
        GatewayTool::ListMcpServers,
        GatewayTool::CreateMcpServer,
        GatewayTool::UpdateMcpServer,
        GatewayTool::DeleteMcpServer,
        GatewayTool::RouteModelRequest,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            GatewayTool::GetUserProfile => "get_user_profile",
            GatewayTool::ListProjects => "list_projects",
            GatewayTool::CreateProject => "create_project",
            GatewayTool::GetUsage => "get_usage",
            GatewayTool::ListApiKeys => "list_api_keys",
            GatewayTool::CreateApiKey => "create_api_key",
            GatewayTool::ListAdapters => "list_adapters",
            GatewayTool::ListMcpServers => "list_mcp_servers",
            GatewayTool::CreateMcpServer => "create_mcp_server",
            GatewayTool::UpdateMcpServer => "update_mcp_server",
            GatewayTool::DeleteMcpServer => "delete_mcp_server",
            GatewayTool::RouteModelRequest => "route_model_request",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            GatewayTool::GetUserProfile => "Get the authenticated user's profile",
            GatewayTool::ListProjects => "List your projects, newest first",
            GatewayTool::CreateProject => "Create a new project",
            GatewayTool::GetUsage => "Show your monthly budget and 30-day usage by tool and model",
            GatewayTool::ListApiKeys => "List your API keys (metadata only)",
            GatewayTool::CreateApiKey => "Create an API key. The key is shown once.",
            GatewayTool::ListAdapters => "List your LoRA adapters",
            GatewayTool::ListMcpServers => "List your registered upstream MCP servers",
            GatewayTool::CreateMcpServer => "Register an upstream MCP server reachable over https",
            GatewayTool::UpdateMcpServer => "Update one of your upstream MCP servers",
            GatewayTool::DeleteMcpServer => "Delete one of your upstream MCP servers",
            GatewayTool::RouteModelRequest => {
                "Pick a model and endpoint for a completion request within your budget"
            }
        }
    }

    fn input_schema(&self) -> Value {
        let empty = json!({ "type": "object", "properties": {} });
        match self {
            GatewayTool::GetUserProfile
            | GatewayTool::ListProjects
            | GatewayTool::GetUsage
            | GatewayTool::ListApiKeys
            | GatewayTool::ListAdapters
            | GatewayTool::ListMcpServers => empty,
            GatewayTool::CreateProject => json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "description": { "type": "string" },
                    "is_public": { "type": "boolean" }
                },
                "required": ["name"]
            }),
            GatewayTool::CreateApiKey => json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "expires_at": { "type": "string", "format": "date-time" }
                }
            }),
            GatewayTool::CreateMcpServer => json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "upstream_base_url": { "type": "string", "format": "uri" },
                    "slug": { "type": "string" }
                },
                "required": ["name", "upstream_base_url"]
            }),
            GatewayTool::UpdateMcpServer => json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "format": "uuid" },
                    "name": { "type": "string" },
                    "slug": { "type": "string" },
                    "upstream_base_url": { "type": "string", "format": "uri" },
                    "enabled": { "type": "boolean" }
                },
                "required": ["id"]
            }),
            GatewayTool::DeleteMcpServer => json!({
                "type": "object",
                "properties": { "id": { "type": "string", "format": "uuid" } },
                "required": ["id"]
            }),
            GatewayTool::RouteModelRequest => json!({
                "type": "object",
                "properties": {
                    "model": { "type": "string" },
                    "messages": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "role": { "type": "string" },
                                "content": {}
                            }
                        }
                    },
                    "tools": { "type": "array" },
                    "max_tokens": { "type": "integer", "minimum": 0 },
                    "temperature": { "type": "number" },
                    "stream": { "type": "boolean" }
                }
            }),
        }
    }

    pub fn definition(&self) -> Tool {
        Tool {
            name: self.name().to_string(),
            description: Some(self.description().to_string()),
            input_schema: self.input_schema(),
        }
    }
}

/// Static `tools/list` catalog
pub fn catalog() -> Vec<Tool> {
    GatewayTool::ALL.iter().map(GatewayTool::definition).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for tool in GatewayTool::ALL {
            assert_eq!(GatewayTool::from_name(tool.name()), Some(tool));
        }
        assert_eq!(GatewayTool::from_name("summarize"), None);
    }

    #[test]
    fn test_catalog_lists_every_tool_with_object_schema() {
        let tools = catalog();
        assert_eq!(tools.len(), GatewayTool::ALL.len());
        assert!(tools.iter().all(|t| t.input_schema["type"] == "object"));
        assert!(tools.iter().any(|t| t.name == "route_model_request"));
    }
}
