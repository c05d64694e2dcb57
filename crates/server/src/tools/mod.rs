//! MCP tool implementations.
//!
//! This module contains all tools exposed by the recall-mcp server.

pub mod answer;
pub mod cache;
pub mod status;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use recall_core::Error;
use serde::Serialize;

/// Render `output` as a pretty JSON text result.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}
