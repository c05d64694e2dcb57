//! quota_stats and queue_status tool implementations.

use recall_client::AppContext;
use rmcp::{ErrorData as McpError, model::CallToolResult};

use super::json_result;

/// Implementation of the quota_stats tool.
pub async fn quota_impl(ctx: &AppContext) -> Result<CallToolResult, McpError> {
    json_result(&ctx.limiter.stats())
}

/// Implementation of the queue_status tool.
pub async fn queue_impl(ctx: &AppContext) -> Result<CallToolResult, McpError> {
    json_result(&ctx.queue.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{context, output};
    use recall_client::{QueueStatus, RequestStatus};
    use recall_core::QuotaStats;

    #[tokio::test(start_paused = true)]
    async fn test_quota_and_queue_after_one_miss() {
        let ctx = context("42").await;
        ctx.retriever.get_answer("meaning of life?", None).await;

        let quota: QuotaStats = output(&quota_impl(&ctx).await.unwrap());
        assert_eq!(quota.minute_used, 1);
        assert_eq!(quota.minute_remaining, 14);
        assert_eq!(quota.daily_remaining, 1499);

        let queue: QueueStatus = output(&queue_impl(&ctx).await.unwrap());
        assert_eq!(queue.settled, 1);
        assert_eq!(queue.queued, 0);
        assert_eq!(queue.recent[0].status, RequestStatus::Succeeded);
        assert_eq!(queue.recent[0].question, "meaning of life?");
    }
}
