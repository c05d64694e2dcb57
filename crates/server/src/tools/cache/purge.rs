//! cache_purge and cache_clear tool implementations.
//!
//! Purges cache entries by age, origin host, or count, and can run one
//! retention-based reclamation pass on demand.

use recall_client::AppContext;
use recall_core::Error;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::json_result;

/// Parameters for the cache_purge tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeParams {
    /// Purge entries created more than this many days ago.
    pub older_than_days: Option<u32>,

    /// Purge entries stored for this origin host.
    pub origin_host: Option<String>,

    /// Keep only the N most recently accessed entries.
    pub max_entries: Option<u64>,

    /// Run one reclamation pass over entries not read within the retention window.
    #[serde(default)]
    pub reclaim_stale: bool,
}

/// Output from the cache_purge and cache_clear tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeOutput {
    /// Number of entries deleted.
    pub deleted: u64,
}

/// Implementation of the cache_purge tool.
pub async fn purge_impl(ctx: &AppContext, params: CachePurgeParams) -> Result<CallToolResult, McpError> {
    if params.older_than_days.is_none()
        && params.origin_host.is_none()
        && params.max_entries.is_none()
        && !params.reclaim_stale
    {
        return Err(Error::InvalidInput(
            "At least one of older_than_days, origin_host, max_entries, or reclaim_stale must be specified".to_string(),
        )
        .into());
    }

    let mut deleted_total = 0u64;

    if params.reclaim_stale {
        deleted_total += ctx.cache.reclaim().await?;
    }

    if let Some(days) = params.older_than_days {
        deleted_total += ctx.cache.purge_older_than(days).await?;
    }

    if let Some(host) = params.origin_host {
        deleted_total += ctx.cache.purge_by_host(&host).await?;
    }

    if let Some(max_entries) = params.max_entries {
        deleted_total += ctx.cache.trim_to(max_entries).await?;
    }

    tracing::info!(deleted = deleted_total, "cache purge completed");
    json_result(&CachePurgeOutput { deleted: deleted_total })
}

/// Implementation of the cache_clear tool.
pub async fn clear_impl(ctx: &AppContext) -> Result<CallToolResult, McpError> {
    let deleted = ctx.cache.clear().await?;
    json_result(&CachePurgeOutput { deleted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{context, output};
    use recall_core::CacheEntry;

    async fn seed(ctx: &AppContext) {
        let now = now_ms();
        for (i, (q, host)) in [("a?", "quiz.example.com"), ("b?", "other.example.com"), ("c?", "quiz.example.com")]
            .into_iter()
            .enumerate()
        {
            let entry = CacheEntry::new(q, "x", 50, now + i as i64).with_origin_host(host);
            ctx.cache.set(&entry).await.unwrap();
        }
    }

    fn now_ms() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64
    }

    #[tokio::test]
    async fn test_purge_by_host() {
        let ctx = context("unused").await;
        seed(&ctx).await;

        let params = CachePurgeParams { origin_host: Some("quiz.example.com".to_string()), ..Default::default() };
        let out: CachePurgeOutput = output(&purge_impl(&ctx, params).await.unwrap());
        assert_eq!(out.deleted, 2);
        assert_eq!(ctx.cache.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_max_entries() {
        let ctx = context("unused").await;
        seed(&ctx).await;

        let params = CachePurgeParams { max_entries: Some(1), ..Default::default() };
        let out: CachePurgeOutput = output(&purge_impl(&ctx, params).await.unwrap());
        assert_eq!(out.deleted, 2);
    }

    #[tokio::test]
    async fn test_purge_older_than_keeps_fresh_entries() {
        let ctx = context("unused").await;
        seed(&ctx).await;
        let old = CacheEntry::new("ancient?", "x", 50, now_ms() - 40 * 86_400_000);
        ctx.cache.set(&old).await.unwrap();

        let params = CachePurgeParams { older_than_days: Some(30), ..Default::default() };
        let out: CachePurgeOutput = output(&purge_impl(&ctx, params).await.unwrap());
        assert_eq!(out.deleted, 1);
        assert_eq!(ctx.cache.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reclaim_stale_drops_unread_entries() {
        let ctx = context("unused").await;
        seed(&ctx).await;
        let unread = CacheEntry::new("forgotten?", "x", 50, now_ms() - 40 * 86_400_000);
        ctx.cache.set(&unread).await.unwrap();

        let params = CachePurgeParams { reclaim_stale: true, ..Default::default() };
        let out: CachePurgeOutput = output(&purge_impl(&ctx, params).await.unwrap());
        assert_eq!(out.deleted, 1);
        assert!(ctx.cache.peek(&unread.key).await.unwrap().is_none());
        assert_eq!(ctx.cache.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_purge_no_params() {
        let ctx = context("unused").await;
        let result = purge_impl(&ctx, CachePurgeParams::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_clear() {
        let ctx = context("unused").await;
        seed(&ctx).await;

        let out: CachePurgeOutput = output(&clear_impl(&ctx).await.unwrap());
        assert_eq!(out.deleted, 3);
        assert_eq!(ctx.cache.count().await.unwrap(), 0);
    }
}
