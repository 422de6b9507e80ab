//! MCP (Model Context Protocol) server implementation

use async_trait::async_trait;
use rust_mcp_schema::{
    schema_utils::CallToolError, CallToolRequest, CallToolResult, ContentBlock, Implementation,
    InitializeResult, ListToolsRequest, ListToolsResult, RpcError, ServerCapabilities,
    ServerCapabilitiesTools, TextContent, Tool, ToolInputSchema, LATEST_PROTOCOL_VERSION,
};
use rust_mcp_sdk::{mcp_server::ServerHandler, McpServer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::tool::{QueryTool, TOOL_DESCRIPTION, TOOL_NAME};

/// Clarix MCP Server Handler
pub struct ClarixServerHandler {
    tool: Arc<QueryTool>,
}

impl ClarixServerHandler {
    pub fn new(tool: Arc<QueryTool>) -> Self {
        Self { tool }
    }

    /// Create server initialization details
    pub fn server_info() -> InitializeResult {
        InitializeResult {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ServerCapabilitiesTools { list_changed: None }),
                ..Default::default()
            },
            server_info: Implementation {
                name: "clarix-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Clarix Natural Language to SQL Server".to_string()),
            },
            instructions: Some(format!(
                "Clarix answers analytics questions with SQL. Call '{}' with the user's question.",
                TOOL_NAME
            )),
            meta: None,
        }
    }

    fn tools() -> Vec<Tool> {
        let mut properties = HashMap::new();

        let mut question_prop = Map::new();
        question_prop.insert("type".to_string(), Value::String("string".to_string()));
        question_prop.insert(
            "description".to_string(),
            Value::String(
                "The user's question in plain language (e.g., 'How many signups came from RedCrossBlood.org last month?')"
                    .to_string(),
            ),
        );
        properties.insert("question".to_string(), question_prop);

        vec![Tool {
            name: TOOL_NAME.to_string(),
            description: Some(TOOL_DESCRIPTION.to_string()),
            input_schema: ToolInputSchema::new(vec!["question".to_string()], Some(properties)),
            title: None,
            annotations: None,
            meta: None,
            output_schema: None,
        }]
    }

    async fn handle_query_tool(
        &self,
        arguments: Option<Map<String, Value>>,
    ) -> std::result::Result<CallToolResult, CallToolError> {
        let args = arguments.ok_or_else(|| CallToolError::from_message("Missing arguments"))?;

        let question = args
            .get("question")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CallToolError::from_message("Missing required argument: question"))?;

        info!(question = %question, "Answering question");

        let (body, is_error) = match self.tool.invoke(question).await {
            Ok(tabular) => (tabular.to_json(), None),
            Err(failure) => (failure.to_json(), Some(true)),
        };

        Ok(CallToolResult {
            content: vec![ContentBlock::TextContent(TextContent::new(
                serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string()),
                None,
                None,
            ))],
            is_error,
            meta: None,
            structured_content: None,
        })
    }
}

#[async_trait]
impl ServerHandler for ClarixServerHandler {
    async fn handle_list_tools_request(
        &self,
        _request: ListToolsRequest,
        _runtime: Arc<dyn McpServer>,
    ) -> std::result::Result<ListToolsResult, RpcError> {
        info!("Listing available tools");

        Ok(ListToolsResult {
            tools: Self::tools(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn handle_call_tool_request(
        &self,
        request: CallToolRequest,
        _runtime: Arc<dyn McpServer>,
    ) -> std::result::Result<CallToolResult, CallToolError> {
        info!("Tool called: {}", request.params.name);

        match request.params.name.as_str() {
            TOOL_NAME => self.handle_query_tool(request.params.arguments).await,
            _ => Err(CallToolError::unknown_tool(request.params.name.clone())),
        }
    }
}
