//! Serialized delivery of endpoint requests.
//!
//! A single worker task drains an unbounded channel strictly FIFO. Each
//! request moves through
//!
//! ```text
//! Pending -> Dispatching -> Succeeded
//!                        -> Retrying -> Dispatching
//!                        -> Failed
//! ```
//!
//! and settles exactly once. Every dispatch attempt is checked against the
//! quota limiter, waits for the spacing slot, and is recorded before the
//! endpoint is called. Quota denials settle immediately and are not retried.

pub mod log;

pub use log::{LogEntry, RequestLog, RequestStatus};

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use recall_core::config::QueueConfig;
use recall_core::{Error, QuotaLimiter};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::endpoint::{AnswerEndpoint, AnswerPrompt, ParsedAnswer, dispatch_once};

/// Lifecycle of a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Dispatching,
    Retrying,
    Succeeded,
    Failed,
}

impl RequestState {
    fn as_str(self) -> &'static str {
        match self {
            RequestState::Pending => "pending",
            RequestState::Dispatching => "dispatching",
            RequestState::Retrying => "retrying",
            RequestState::Succeeded => "succeeded",
            RequestState::Failed => "failed",
        }
    }
}

/// A request waiting in, or being worked by, the queue.
#[derive(Debug)]
pub struct QueuedRequest {
    pub prompt: AnswerPrompt,
    pub enqueued_at: Instant,
    /// Retries already taken; the first dispatch is attempt zero.
    pub attempt_count: u32,
    respond_to: oneshot::Sender<Result<ParsedAnswer, Error>>,
}

/// Handle to the eventual result of a submitted request.
#[derive(Debug)]
pub struct PendingAnswer {
    rx: oneshot::Receiver<Result<ParsedAnswer, Error>>,
}

impl PendingAnswer {
    /// Wait for the request to settle.
    pub async fn wait(self) -> Result<ParsedAnswer, Error> {
        self.rx.await.unwrap_or(Err(Error::QueueClosed))
    }
}

/// Point-in-time view of the queue.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct QueueStatus {
    /// Requests submitted but not yet picked up by the worker.
    pub queued: usize,
    /// Whether the worker is currently working a request.
    pub processing: bool,
    /// Requests settled since start.
    pub settled: u64,
    /// Most recent settlements, oldest first.
    pub recent: Vec<LogEntry>,
}

#[derive(Debug)]
struct QueueShared {
    queued: AtomicUsize,
    processing: AtomicBool,
    settled: AtomicU64,
    log: Mutex<RequestLog>,
}

impl QueueShared {
    fn log(&self) -> std::sync::MutexGuard<'_, RequestLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// FIFO delivery queue in front of an [`AnswerEndpoint`].
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    tx: mpsc::UnboundedSender<QueuedRequest>,
    shared: Arc<QueueShared>,
}

impl DeliveryQueue {
    /// Spawn the worker on the current tokio runtime.
    pub fn start(
        config: QueueConfig, limiter: Arc<QuotaLimiter>, endpoint: Arc<dyn AnswerEndpoint>, timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(QueueShared {
            queued: AtomicUsize::new(0),
            processing: AtomicBool::new(false),
            settled: AtomicU64::new(0),
            log: Mutex::new(RequestLog::new(config.log_capacity)),
        });

        let worker = Worker { config, limiter, endpoint, timeout, shared: Arc::clone(&shared) };
        tokio::spawn(worker.run(rx));

        Self { tx, shared }
    }

    /// Append a request and return a handle to its result.
    ///
    /// The request settles even if the handle is dropped.
    pub fn submit(&self, prompt: AnswerPrompt) -> Result<PendingAnswer, Error> {
        let (respond_to, rx) = oneshot::channel();
        let request = QueuedRequest { prompt, enqueued_at: Instant::now(), attempt_count: 0, respond_to };

        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(request).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::QueueClosed);
        }

        tracing::debug!(state = RequestState::Pending.as_str(), queued = self.len(), "request enqueued");
        Ok(PendingAnswer { rx })
    }

    /// Submit a request and wait for it to settle.
    pub async fn enqueue(&self, prompt: AnswerPrompt) -> Result<ParsedAnswer, Error> {
        self.submit(prompt)?.wait().await
    }

    /// Requests waiting to be picked up.
    pub fn len(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_processing(&self) -> bool {
        self.shared.processing.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            queued: self.len(),
            processing: self.is_processing(),
            settled: self.shared.settled.load(Ordering::SeqCst),
            recent: self.shared.log().entries(),
        }
    }
}

struct Worker {
    config: QueueConfig,
    limiter: Arc<QuotaLimiter>,
    endpoint: Arc<dyn AnswerEndpoint>,
    timeout: Duration,
    shared: Arc<QueueShared>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<QueuedRequest>) {
        while let Some(mut request) = rx.recv().await {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            self.shared.processing.store(true, Ordering::SeqCst);

            let result = self.process(&mut request).await;
            self.settle(request, result);

            self.shared.processing.store(false, Ordering::SeqCst);
        }
        tracing::debug!("delivery queue worker stopped");
    }

    async fn process(&self, request: &mut QueuedRequest) -> Result<ParsedAnswer, Error> {
        let prompt = request.prompt.render();

        loop {
            tracing::debug!(
                state = RequestState::Dispatching.as_str(),
                attempt = request.attempt_count + 1,
                "dispatching request"
            );

            match self.attempt(&prompt).await {
                Ok(answer) => return Ok(answer),
                Err(err) if err.is_retryable() && request.attempt_count < self.config.max_retries => {
                    let delay = self.config.backoff(request.attempt_count);
                    request.attempt_count += 1;
                    tracing::warn!(
                        state = RequestState::Retrying.as_str(),
                        retry = request.attempt_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One gated endpoint call.
    async fn attempt(&self, prompt: &str) -> Result<ParsedAnswer, Error> {
        self.limiter.acquire().await.into_result()?;

        dispatch_once(self.endpoint.as_ref(), prompt, self.timeout).await
    }

    fn settle(&self, request: QueuedRequest, result: Result<ParsedAnswer, Error>) {
        let attempts = request.attempt_count + 1;
        let (status, error) = match &result {
            Ok(_) => (RequestStatus::Succeeded, None),
            Err(err @ Error::RateLimitExceeded { .. }) => (RequestStatus::RateLimited, Some(err.to_string())),
            Err(err) => (RequestStatus::Failed, Some(err.to_string())),
        };
        let state = if result.is_ok() { RequestState::Succeeded } else { RequestState::Failed };

        self.shared.log().push(LogEntry::new(status, &request.prompt.question, attempts, error));
        self.shared.settled.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            state = state.as_str(),
            attempts,
            waited_ms = request.enqueued_at.elapsed().as_millis() as u64,
            "request settled"
        );

        if request.respond_to.send(result).is_err() {
            tracing::debug!("request settled after caller went away");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use recall_core::config::QuotaConfig;
    use recall_core::quota::ManualClock;
    use std::collections::VecDeque;

    /// Replays scripted replies and records every prompt it receives.
    #[derive(Debug, Default)]
    struct ScriptedEndpoint {
        replies: Mutex<VecDeque<Result<String, Error>>>,
        calls: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl ScriptedEndpoint {
        fn new(replies: Vec<Result<String, Error>>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies.into()), ..Default::default() })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self { delay: Some(delay), ..Default::default() })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AnswerEndpoint for ScriptedEndpoint {
        async fn complete(&self, prompt: &str) -> Result<String, Error> {
            self.calls.lock().unwrap().push(prompt.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.replies.lock().unwrap().pop_front().unwrap_or_else(|| Ok("default answer".to_string()))
        }
    }

    fn status(code: u16) -> Error {
        Error::Endpoint { status: code, details: String::new() }
    }

    fn limiter(per_minute: u32) -> Arc<QuotaLimiter> {
        let clock = ManualClock::new(chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let config = QuotaConfig { per_minute, per_day: 1500, min_spacing_ms: 500 };
        Arc::new(QuotaLimiter::with_clock(config, Arc::new(clock)))
    }

    fn queue_with(endpoint: Arc<ScriptedEndpoint>, limiter: Arc<QuotaLimiter>) -> DeliveryQueue {
        DeliveryQueue::start(QueueConfig::default(), limiter, endpoint, Duration::from_millis(5000))
    }

    fn prompt(question: &str) -> AnswerPrompt {
        AnswerPrompt::new(question, None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let endpoint = ScriptedEndpoint::new(vec![Ok("Paris\nConfidence: 90".into())]);
        let queue = queue_with(endpoint.clone(), limiter(15));

        let answer = queue.enqueue(prompt("capital of France?")).await.unwrap();
        assert_eq!(answer.text, "Paris");
        assert_eq!(answer.confidence, 90);
        assert_eq!(endpoint.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_429_then_success() {
        let endpoint = ScriptedEndpoint::new(vec![Err(status(429)), Ok("B".into())]);
        let queue = queue_with(endpoint.clone(), limiter(15));

        let start = tokio::time::Instant::now();
        let answer = queue.enqueue(prompt("which?")).await.unwrap();

        assert_eq!(answer.text, "B");
        assert_eq!(endpoint.calls().len(), 2);
        assert!(start.elapsed() >= Duration::from_millis(1000));

        let status = queue.status();
        assert_eq!(status.settled, 1);
        assert_eq!(status.recent[0].attempts, 2);
        assert_eq!(status.recent[0].status, RequestStatus::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_not_retried() {
        let endpoint = ScriptedEndpoint::new(vec![Err(status(401))]);
        let queue = queue_with(endpoint.clone(), limiter(15));

        let result = queue.enqueue(prompt("which?")).await;
        assert!(matches!(result, Err(Error::Endpoint { status: 401, .. })));
        assert_eq!(endpoint.calls().len(), 1);
        assert_eq!(queue.status().recent[0].status, RequestStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound() {
        let endpoint = ScriptedEndpoint::new(vec![Err(status(503)), Err(status(503)), Err(status(503)), Ok("late".into())]);
        let queue = queue_with(endpoint.clone(), limiter(15));

        let result = queue.enqueue(prompt("which?")).await;
        assert!(matches!(result, Err(Error::Endpoint { status: 503, .. })));
        assert_eq!(endpoint.calls().len(), 3);
        assert_eq!(queue.status().recent[0].attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried() {
        let endpoint = ScriptedEndpoint::slow(Duration::from_secs(10));
        let queue = queue_with(endpoint.clone(), limiter(15));

        let result = queue.enqueue(prompt("slow?")).await;
        assert!(matches!(result, Err(Error::Timeout(5000))));
        assert_eq!(endpoint.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_order() {
        let endpoint = ScriptedEndpoint::new(vec![]);
        let queue = queue_with(endpoint.clone(), limiter(15));

        let pending: Vec<_> =
            ["first", "second", "third"].iter().map(|q| queue.submit(prompt(q)).unwrap()).collect();
        for handle in pending {
            handle.wait().await.unwrap();
        }

        let calls = endpoint.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].contains("first"));
        assert!(calls[1].contains("second"));
        assert!(calls[2].contains("third"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_denial_settles_without_retry() {
        let endpoint = ScriptedEndpoint::new(vec![]);
        let limiter = limiter(2);
        let queue = queue_with(endpoint.clone(), Arc::clone(&limiter));

        queue.enqueue(prompt("one")).await.unwrap();
        queue.enqueue(prompt("two")).await.unwrap();
        let result = queue.enqueue(prompt("three")).await;

        assert!(matches!(result, Err(Error::RateLimitExceeded { .. })));
        assert_eq!(endpoint.calls().len(), 2);
        assert_eq!(limiter.stats().minute_used, 2);

        let recent = queue.status().recent;
        assert_eq!(recent[2].status, RequestStatus::RateLimited);
        assert_eq!(recent[2].attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_count_against_quota() {
        let endpoint = ScriptedEndpoint::new(vec![Err(status(500)), Err(status(500)), Ok("ok".into())]);
        let limiter = limiter(15);
        let queue = queue_with(endpoint, Arc::clone(&limiter));

        queue.enqueue(prompt("q")).await.unwrap();
        assert_eq!(limiter.stats().minute_used, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_still_settles() {
        let endpoint = ScriptedEndpoint::new(vec![]);
        let queue = queue_with(endpoint.clone(), limiter(15));

        drop(queue.submit(prompt("abandoned")).unwrap());
        queue.enqueue(prompt("kept")).await.unwrap();

        assert_eq!(endpoint.calls().len(), 2);
        assert_eq!(queue.status().settled, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_capacity() {
        let endpoint = ScriptedEndpoint::new(vec![]);
        let config = QueueConfig { log_capacity: 2, ..Default::default() };
        let queue = DeliveryQueue::start(config, limiter(15), endpoint, Duration::from_millis(5000));

        for q in ["a", "b", "c"] {
            queue.enqueue(prompt(q)).await.unwrap();
        }

        let status = queue.status();
        assert_eq!(status.settled, 3);
        assert_eq!(status.recent.len(), 2);
        assert_eq!(status.recent[0].question, "b");
        assert!(!status.processing);
        assert_eq!(status.queued, 0);
    }
}
