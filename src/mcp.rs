//! MCP JSON-RPC protocol bridge.
//!
//! Adapts the [`ToolRegistry`] to MCP `list_tools` / `call_tool`. The same
//! bridge is served over Streamable HTTP (mounted at `/mcp` by the server)
//! and over stdio by `toolbox serve stdio`.

use std::borrow::Cow;
use std::sync::Arc;

use anyhow::Result;
use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};
use tracing::info;

use crate::config::Config;
use crate::error::ToolError;
use crate::tools::{ToolContext, ToolRegistry};

/// Each MCP session receives a clone of this struct, so all sessions share
/// one registry.
#[derive(Clone)]
pub struct McpBridge {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
}

impl McpBridge {
    pub fn new(config: Arc<Config>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            ctx: ToolContext::new(config),
        }
    }

    fn to_mcp_tool(tool: &dyn crate::tools::Tool) -> Tool {
        let input_schema = match tool.parameters_schema() {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        };
        let annotations = if tool.requires_permission() {
            ToolAnnotations::new().destructive(true)
        } else {
            ToolAnnotations::new().read_only(true)
        };

        Tool {
            name: Cow::Owned(tool.name().to_string()),
            title: None,
            description: Some(Cow::Owned(tool.description().to_string())),
            input_schema,
            output_schema: None,
            annotations: Some(annotations),
            execution: None,
            icons: None,
            meta: None,
        }
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "agent-toolbox".to_string(),
                title: Some("Agent Toolbox".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Local tools for agents. rag_* tools manage and query the knowledge base \
                 (datasets agent_core, context_flow, agent_memory); file_*, system_* and \
                 web_search act on the local machine and the web. Tools annotated as \
                 destructive only run when called with \"allow\": true."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = self
            .tools
            .tools()
            .iter()
            .map(|t| Self::to_mcp_tool(t.as_ref()))
            .collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.tools.find(name).map(Self::to_mcp_tool)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if self.tools.find(&request.name).is_none() {
            return Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            ));
        }

        let params = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        match self.tools.call(&request.name, params, &self.ctx).await {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => {
                let (_, code) = ToolError::classify(&e);
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "{}: {}",
                    code, e
                ))]))
            }
        }
    }
}

/// Serve the bridge over stdin/stdout until the client disconnects.
pub async fn serve_stdio(config: &Config) -> Result<()> {
    let bridge = McpBridge::new(
        Arc::new(config.clone()),
        Arc::new(ToolRegistry::with_builtins()),
    );
    info!("MCP server on stdio");
    bridge.serve(rmcp::transport::stdio()).await?.waiting().await?;
    Ok(())
}
