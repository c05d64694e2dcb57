//! get_answer and retriever_stats tool implementations.

use recall_client::{AnswerQuery, AnswerResult, AnswerSource, AppContext, RetrieverStats};
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Parameters for the get_answer tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GetAnswerParams {
    /// The question to answer. Cache keys are exact, so spelling and spacing matter.
    pub question: String,

    /// Extra context sent with the question on a cache miss (e.g. answer options).
    #[serde(default)]
    pub context: Option<String>,

    /// Host the question came from, stored with fresh answers.
    #[serde(default)]
    pub origin_host: Option<String>,

    /// Category stored with fresh answers (default "answer").
    #[serde(default)]
    pub category: Option<String>,
}

/// Implementation of the get_answer tool.
///
/// Retrieval failures come back as a tool error carrying the structured
/// result, never as a protocol error.
pub async fn answer_impl(ctx: &AppContext, params: GetAnswerParams) -> Result<CallToolResult, McpError> {
    let query = AnswerQuery {
        question: params.question,
        context: params.context,
        origin_host: params.origin_host,
        category: params.category,
    };

    let result: AnswerResult = ctx.retriever.get_answer_for(&query).await;
    if result.source == AnswerSource::Error {
        let json = serde_json::to_string_pretty(&result).unwrap_or_default();
        return Ok(CallToolResult::error(vec![Content::text(json)]));
    }

    json_result(&result)
}

/// Parameters for the retriever_stats tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RetrieverStatsParams {
    /// Zero the counters after reading them.
    #[serde(default)]
    pub reset: bool,
}

/// Implementation of the retriever_stats tool.
pub async fn stats_impl(ctx: &AppContext, params: RetrieverStatsParams) -> Result<CallToolResult, McpError> {
    let stats: RetrieverStats = ctx.retriever.get_stats();
    if params.reset {
        ctx.retriever.reset_stats();
    }
    json_result(&stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{context, output};

    #[tokio::test(start_paused = true)]
    async fn test_answer_miss_then_hit() {
        let ctx = context("Paris\nConfidence: 97").await;
        let params = GetAnswerParams { question: "Capital of France?".into(), ..Default::default() };

        let first: AnswerResult = output(&answer_impl(&ctx, params.clone()).await.unwrap());
        assert_eq!(first.source, AnswerSource::Api);
        assert_eq!(first.answer, "Paris");

        let second: AnswerResult = output(&answer_impl(&ctx, params).await.unwrap());
        assert_eq!(second.source, AnswerSource::Cache);
        assert_eq!(second.confidence, 97);
    }

    #[tokio::test]
    async fn test_answer_empty_question_is_tool_error() {
        let ctx = context("unused").await;
        let params = GetAnswerParams { question: "  ".into(), ..Default::default() };

        let result = answer_impl(&ctx, params).await.unwrap();
        assert_eq!(result.is_error, Some(true));

        let body: AnswerResult = output(&result);
        assert_eq!(body.source, AnswerSource::Error);
        assert!(body.error.unwrap().starts_with("INVALID_INPUT"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_and_reset() {
        let ctx = context("yes").await;
        let params = GetAnswerParams { question: "Is it?".into(), ..Default::default() };
        answer_impl(&ctx, params.clone()).await.unwrap();
        answer_impl(&ctx, params).await.unwrap();

        let stats: RetrieverStats = output(&stats_impl(&ctx, RetrieverStatsParams { reset: true }).await.unwrap());
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.hit_rate, 50.0);

        let stats: RetrieverStats = output(&stats_impl(&ctx, RetrieverStatsParams::default()).await.unwrap());
        assert_eq!(stats.total, 0);
    }
}
