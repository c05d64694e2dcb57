//! Cache-first answer retrieval.
//!
//! [`AnswerRetriever::get_answer`] consults the cache, falls back to the
//! endpoint on a miss (through the delivery queue when one is attached,
//! otherwise directly under the quota limiter), persists the fresh answer, and
//! always hands back a structured [`AnswerResult`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use recall_core::cache::compute_cache_key;
use recall_core::cache::entries::DEFAULT_CATEGORY;
use recall_core::{CacheEntry, Clock, ContentCache, Error, QuotaLimiter, SystemClock};
use serde::{Deserialize, Serialize};

use crate::endpoint::{AnswerEndpoint, AnswerPrompt, ParsedAnswer, dispatch_once};
use crate::queue::DeliveryQueue;

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AnswerSource {
    Cache,
    Api,
    Error,
}

/// Structured result of a retrieval. Never an `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct AnswerResult {
    pub answer: String,
    pub confidence: u8,
    pub source: AnswerSource,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnswerResult {
    fn from_entry(entry: &CacheEntry, elapsed: Duration) -> Self {
        Self {
            answer: entry.answer_text.clone(),
            confidence: entry.confidence,
            source: AnswerSource::Cache,
            elapsed_ms: elapsed.as_millis() as u64,
            error: None,
        }
    }

    fn from_api(answer: ParsedAnswer, elapsed: Duration) -> Self {
        Self {
            answer: answer.text,
            confidence: answer.confidence,
            source: AnswerSource::Api,
            elapsed_ms: elapsed.as_millis() as u64,
            error: None,
        }
    }

    fn from_error(err: &Error, elapsed: Duration) -> Self {
        Self {
            answer: String::new(),
            confidence: 0,
            source: AnswerSource::Error,
            elapsed_ms: elapsed.as_millis() as u64,
            error: Some(err.to_string()),
        }
    }
}

/// A retrieval request with optional provenance for the stored entry.
#[derive(Debug, Clone, Default)]
pub struct AnswerQuery {
    pub question: String,
    pub context: Option<String>,
    pub origin_host: Option<String>,
    pub category: Option<String>,
}

impl AnswerQuery {
    pub fn new(question: impl Into<String>) -> Self {
        Self { question: question.into(), ..Default::default() }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_origin_host(mut self, host: impl Into<String>) -> Self {
        self.origin_host = Some(host.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Retrieval counters since start or the last reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct RetrieverStats {
    pub hits: u64,
    pub misses: u64,
    /// Retrievals that ended with `source=error`.
    pub errors: u64,
    /// Cache lookups (hits + misses).
    pub total: u64,
    /// Percentage of lookups served from cache.
    pub hit_rate: f64,
    pub miss_rate: f64,
    /// Mean elapsed time over every returned result.
    pub avg_elapsed_ms: f64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    errors: u64,
    results: u64,
    elapsed_ms: u64,
}

/// Cache-first front door to the answer endpoint.
#[derive(Debug)]
pub struct AnswerRetriever {
    cache: Arc<ContentCache>,
    limiter: Arc<QuotaLimiter>,
    endpoint: Arc<dyn AnswerEndpoint>,
    queue: Option<DeliveryQueue>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    counters: Mutex<Counters>,
}

impl AnswerRetriever {
    /// A retriever that calls the endpoint directly under the limiter.
    pub fn new(
        cache: Arc<ContentCache>, limiter: Arc<QuotaLimiter>, endpoint: Arc<dyn AnswerEndpoint>, timeout: Duration,
    ) -> Self {
        Self {
            cache,
            limiter,
            endpoint,
            queue: None,
            timeout,
            clock: Arc::new(SystemClock),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Route misses through `queue` instead of calling the endpoint directly.
    pub fn with_queue(mut self, queue: DeliveryQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Use `clock` for entry timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer `question`, from cache when possible.
    pub async fn get_answer(&self, question: &str, context: Option<&str>) -> AnswerResult {
        let query = AnswerQuery { question: question.to_string(), context: context.map(str::to_string), ..Default::default() };
        self.get_answer_for(&query).await
    }

    /// Answer a query, storing provenance with any freshly fetched answer.
    pub async fn get_answer_for(&self, query: &AnswerQuery) -> AnswerResult {
        let start = Instant::now();
        let outcome = self.resolve(query).await;
        let elapsed = start.elapsed();

        let result = match outcome {
            Ok(Resolved::Cached(entry)) => AnswerResult::from_entry(&entry, elapsed),
            Ok(Resolved::Fetched(answer)) => AnswerResult::from_api(answer, elapsed),
            Err(err) => {
                tracing::warn!(error = %err, "answer retrieval failed");
                self.counters().errors += 1;
                AnswerResult::from_error(&err, elapsed)
            }
        };

        let mut counters = self.counters();
        counters.results += 1;
        counters.elapsed_ms += result.elapsed_ms;
        result
    }

    async fn resolve(&self, query: &AnswerQuery) -> Result<Resolved, Error> {
        let prompt = AnswerPrompt::new(query.question.clone(), query.context.clone());
        prompt.validate()?;

        let key = compute_cache_key(&query.question);
        if let Some(entry) = self.cache.get(&key).await? {
            self.counters().hits += 1;
            return Ok(Resolved::Cached(entry));
        }
        self.counters().misses += 1;

        let answer = match &self.queue {
            Some(queue) => queue.enqueue(prompt).await?,
            None => self.dispatch_direct(&prompt).await?,
        };

        let entry = CacheEntry::new(&query.question, &answer.text, answer.confidence, self.clock.now_ms())
            .with_category(query.category.as_deref().unwrap_or(DEFAULT_CATEGORY))
            .with_origin_host(query.origin_host.as_deref().unwrap_or_default());
        if let Err(e) = self.cache.set(&entry).await {
            tracing::warn!(key = %key, error = %e, "failed to store fetched answer");
        }

        Ok(Resolved::Fetched(answer))
    }

    async fn dispatch_direct(&self, prompt: &AnswerPrompt) -> Result<ParsedAnswer, Error> {
        self.limiter.acquire().await.into_result()?;

        dispatch_once(self.endpoint.as_ref(), &prompt.render(), self.timeout).await
    }

    pub fn get_stats(&self) -> RetrieverStats {
        let counters = self.counters();
        let total = counters.hits + counters.misses;
        let percent = |n: u64| if total == 0 { 0.0 } else { n as f64 * 100.0 / total as f64 };

        RetrieverStats {
            hits: counters.hits,
            misses: counters.misses,
            errors: counters.errors,
            total,
            hit_rate: percent(counters.hits),
            miss_rate: percent(counters.misses),
            avg_elapsed_ms: if counters.results == 0 {
                0.0
            } else {
                counters.elapsed_ms as f64 / counters.results as f64
            },
        }
    }

    /// Zero every counter. Cached entries are untouched.
    pub fn reset_stats(&self) {
        *self.counters() = Counters::default();
    }
}

enum Resolved {
    Cached(CacheEntry),
    Fetched(ParsedAnswer),
}
