//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.

use std::sync::Arc;

use recall_client::AppContext;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

use crate::tools::answer::{GetAnswerParams, RetrieverStatsParams};
use crate::tools::cache::{CacheGetParams, CachePurgeParams};
use crate::tools::{answer, cache, status};

/// The main MCP server handler for recall-mcp.
#[derive(Clone)]
pub struct RecallServer {
    ctx: Arc<AppContext>,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl RecallServer {
    /// Create a new server handler around a built context.
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx, tool_router: Self::tool_router() }
    }

    /// Answer a question, from the local cache when possible.
    #[tool(
        description = "Answer a question. Serves cached answers first; on a miss calls the remote model under quota and caches the result. Returns answer, confidence, source (cache|api|error) and elapsed_ms."
    )]
    async fn get_answer(&self, params: Parameters<GetAnswerParams>) -> Result<CallToolResult, McpError> {
        answer::answer_impl(&self.ctx, params.0).await
    }

    #[tool(description = "Hit/miss/error counters, hit rate and average latency. Pass reset=true to zero them.")]
    async fn retriever_stats(&self, params: Parameters<RetrieverStatsParams>) -> Result<CallToolResult, McpError> {
        answer::stats_impl(&self.ctx, params.0).await
    }

    #[tool(description = "Read cached answers by exact question, cache key, or origin host without counting a hit.")]
    async fn cache_get(&self, params: Parameters<CacheGetParams>) -> Result<CallToolResult, McpError> {
        cache::get_impl(&self.ctx, params.0).await
    }

    #[tool(description = "Cache size, approximate bytes, ceiling and utilization.")]
    async fn cache_stats(&self) -> Result<CallToolResult, McpError> {
        cache::stats_impl(&self.ctx).await
    }

    #[tool(
        description = "Purge cached answers by age (older_than_days), origin_host, or keep only max_entries. Set reclaim_stale=true to run one reclamation pass over entries unread within the retention window."
    )]
    async fn cache_purge(&self, params: Parameters<CachePurgeParams>) -> Result<CallToolResult, McpError> {
        cache::purge_impl(&self.ctx, params.0).await
    }

    #[tool(description = "Delete every cached answer.")]
    async fn cache_clear(&self) -> Result<CallToolResult, McpError> {
        cache::clear_impl(&self.ctx).await
    }

    #[tool(description = "Per-minute and daily quota usage, remaining calls and the next daily reset.")]
    async fn quota_stats(&self) -> Result<CallToolResult, McpError> {
        status::quota_impl(&self.ctx).await
    }

    #[tool(description = "Delivery queue length, worker state and recently settled requests.")]
    async fn queue_status(&self) -> Result<CallToolResult, McpError> {
        status::queue_impl(&self.ctx).await
    }
}

impl ServerHandler for RecallServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "recall-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "Cache-first question answering. Call get_answer; inspect cache, quota and queue with the *_stats tools."
                    .into(),
            ),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
