//! cache_stats tool implementation.

use recall_client::AppContext;
use rmcp::{ErrorData as McpError, model::CallToolResult};

use crate::tools::json_result;

/// Implementation of the cache_stats tool.
pub async fn stats_impl(ctx: &AppContext) -> Result<CallToolResult, McpError> {
    let stats = ctx.cache.stats().await?;
    json_result(&stats)
}
