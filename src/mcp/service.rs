//! MCP service implementation using rmcp.
//!
//! This module defines the SqlGatewayService struct with the gateway tools
//! exposed via the MCP protocol using the rmcp framework's macros. Policy and
//! engine failures are returned as tool results flagged as errors, carrying the
//! `{error_type, message, hint}` record, so agents can read and react to them.

use crate::db::InstanceRegistry;
use crate::models::{DescribeTableRequest, ListInstancesOutput, ListTablesRequest, RunQueryRequest};
use crate::tools::{QueryToolHandler, SchemaToolHandler, ToolResponse};
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use serde::Serialize;
use std::sync::Arc;

/// Name advertised to MCP clients when none is configured.
pub const DEFAULT_SERVER_NAME: &str = "sql-mcp-server";

#[derive(Clone)]
pub struct SqlGatewayService {
    /// Shared registry of configured instances
    registry: Arc<InstanceRegistry>,
    server_name: String,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl SqlGatewayService {
    pub fn new(registry: Arc<InstanceRegistry>, server_name: impl Into<String>) -> Self {
        Self {
            registry,
            server_name: server_name.into(),
            tool_router: Self::tool_router(),
        }
    }
}

/// Map a gateway outcome onto a tool result; errors stay in-band.
fn into_call_result<T: Serialize>(response: ToolResponse<T>) -> Result<CallToolResult, McpError> {
    match response {
        ToolResponse::Ok(value) => Ok(CallToolResult::success(vec![Content::json(value)?])),
        ToolResponse::Err(err) => Ok(CallToolResult::error(vec![Content::json(err)?])),
    }
}

#[tool_router]
impl SqlGatewayService {
    #[tool(
        description = "List configured database instances.\nReturns each instance id, engine, read-only flag, row cap, statement timeout and table allow-list."
    )]
    async fn list_instances(&self) -> Json<ListInstancesOutput> {
        Json(SchemaToolHandler::new(self.registry.clone()).list_instances())
    }

    #[tool(
        description = "List base tables of a database instance.\nOnly tables on the instance allow-list are shown when one is configured.\nOmit instance_id to use the default instance."
    )]
    async fn list_tables(
        &self,
        Parameters(input): Parameters<ListTablesRequest>,
    ) -> Result<CallToolResult, McpError> {
        let handler = SchemaToolHandler::new(self.registry.clone());
        into_call_result(handler.list_tables(input).await)
    }

    #[tool(
        description = "Describe the columns of a table: column_name and data_type, in ordinal order.\nOmit instance_id to use the default instance."
    )]
    async fn describe_table(
        &self,
        Parameters(input): Parameters<DescribeTableRequest>,
    ) -> Result<CallToolResult, McpError> {
        let handler = SchemaToolHandler::new(self.registry.clone());
        into_call_result(handler.describe_table(input).await)
    }

    #[tool(
        description = "Run a single read-only SELECT (or WITH ... SELECT) statement and return its rows.\nA row cap is added automatically when the statement has none; warnings report any rewrite.\nOmit instance_id to use the default instance."
    )]
    async fn run_query(
        &self,
        Parameters(input): Parameters<RunQueryRequest>,
    ) -> Result<CallToolResult, McpError> {
        let handler = QueryToolHandler::new(self.registry.clone());
        into_call_result(handler.run_query(input).await)
    }
}

#[tool_handler]
impl ServerHandler for SqlGatewayService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: self.server_name.clone(),
                title: Some("SQL MCP Server".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Read-only SQL access to configured database instances.\n\
                \n\
                ## Workflow\n\
                1. Call `list_instances` to see instance ids (omit instance_id for `default`)\n\
                2. Call `list_tables` and `describe_table` to learn the schema\n\
                3. Call `run_query` with a single SELECT statement\n\
                \n\
                ## Rules\n\
                - Only one SELECT (or WITH ... SELECT) statement per call\n\
                - DDL, privilege and procedure keywords are rejected\n\
                - Tables outside an instance allow-list are rejected\n\
                - Results are capped; see `warnings` in the response\n\
                \n\
                Configured instances: {}",
                self.registry.instance_ids().join(", ")
            )),
        }
    }
}
