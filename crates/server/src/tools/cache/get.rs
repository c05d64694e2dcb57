//! cache_get tool implementation.
//!
//! Reads cached answers by question, key, or origin host without counting
//! the read as a hit.

use recall_client::AppContext;
use recall_core::cache::{compute_cache_key, is_valid_key};
use recall_core::{CacheEntry, Error};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::json_result;

/// Default number of entries returned for a host lookup.
const DEFAULT_HOST_LIMIT: usize = 20;

/// Parameters for the cache_get tool. Exactly one selector is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetParams {
    /// Exact question text; hashed to find the entry.
    #[serde(default)]
    pub question: Option<String>,

    /// Cache key (64 hex chars).
    #[serde(default)]
    pub key: Option<String>,

    /// List the most recent entries stored for this host.
    #[serde(default)]
    pub origin_host: Option<String>,

    /// Maximum entries for a host lookup (default 20).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Output from the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetOutput {
    /// Matching entries; empty when nothing is cached.
    pub entries: Vec<CacheEntry>,
}

/// Implementation of the cache_get tool.
pub async fn get_impl(ctx: &AppContext, params: CacheGetParams) -> Result<CallToolResult, McpError> {
    let entries = match (params.question, params.key, params.origin_host) {
        (Some(question), None, None) => {
            ctx.cache.peek(&compute_cache_key(&question)).await?.into_iter().collect()
        }
        (None, Some(key), None) => {
            if !is_valid_key(&key) {
                return Err(Error::InvalidInput(format!("key must be 64 lowercase hex characters, got {key:?}")).into());
            }
            ctx.cache.peek(&key).await?.into_iter().collect()
        }
        (None, None, Some(host)) => {
            ctx.cache
                .entries_by_host(&host, params.limit.unwrap_or(DEFAULT_HOST_LIMIT))
                .await?
        }
        _ => {
            return Err(Error::InvalidInput(
                "Exactly one of question, key, or origin_host must be specified".to_string(),
            )
            .into());
        }
    };

    json_result(&CacheGetOutput { entries })
}
