//! Request quota enforcement for the remote answer endpoint.
//!
//! Three independent limits apply to every dispatched call:
//!
//! - **Per-minute ceiling**: a sliding 60 second window of dispatch timestamps.
//! - **Daily ceiling**: a counter that resets at the next UTC midnight.
//! - **Minimum spacing**: a delay between consecutive dispatches (≤ 2/s by default).
//!
//! The two ceilings deny; the spacing only delays. [`QuotaLimiter::acquire`]
//! holds an async gate across the spacing wait and the final check-and-record,
//! so concurrent callers are admitted one at a time.

mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use crate::Error;
use crate::config::QuotaConfig;
use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Length of the sliding per-minute window.
fn window() -> chrono::Duration {
    chrono::Duration::seconds(60)
}

/// Outcome of a limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitDecision {
    Allowed,
    Denied { reason: String, retry_after: Duration },
}

impl LimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, LimitDecision::Allowed)
    }

    /// Convert a denial into `Error::RateLimitExceeded`.
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            LimitDecision::Allowed => Ok(()),
            LimitDecision::Denied { reason, retry_after } => {
                Err(Error::RateLimitExceeded { reason, retry_after_ms: retry_after.as_millis() as u64 })
            }
        }
    }
}

/// Snapshot of both quota windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct QuotaStats {
    pub minute_used: u32,
    pub minute_limit: u32,
    pub minute_remaining: u32,
    pub daily_used: u32,
    pub daily_limit: u32,
    pub daily_remaining: u32,
    /// RFC 3339 instant at which the daily counter resets.
    pub daily_reset_at: String,
}

#[derive(Debug)]
struct QuotaState {
    recent: VecDeque<DateTime<Utc>>,
    daily_count: u32,
    daily_reset_at: DateTime<Utc>,
    last_dispatch: Option<DateTime<Utc>>,
}

impl QuotaState {
    fn new(now: DateTime<Utc>) -> Self {
        Self { recent: VecDeque::new(), daily_count: 0, daily_reset_at: next_midnight(now), last_dispatch: None }
    }

    fn roll_day(&mut self, now: DateTime<Utc>) {
        if now >= self.daily_reset_at {
            tracing::debug!(previous = self.daily_count, "daily quota counter rolled over");
            self.daily_count = 0;
            self.daily_reset_at = next_midnight(now);
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - window();
        while self.recent.front().is_some_and(|t| *t <= horizon) {
            self.recent.pop_front();
        }
    }
}

/// First instant of the UTC day after `now`.
fn next_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Days::new(1);
    Utc.from_utc_datetime(&tomorrow.and_time(NaiveTime::default()))
}

fn until(later: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (later - now).to_std().unwrap_or(Duration::ZERO)
}

/// Process-wide quota limiter.
#[derive(Debug)]
pub struct QuotaLimiter {
    config: QuotaConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<QuotaState>,
    gate: tokio::sync::Mutex<()>,
}

impl QuotaLimiter {
    pub fn new(config: QuotaConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: QuotaConfig, clock: Arc<dyn Clock>) -> Self {
        let state = QuotaState::new(clock.now());
        Self { config, clock, state: Mutex::new(state), gate: tokio::sync::Mutex::new(()) }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, QuotaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evaluate(&self, state: &mut QuotaState, now: DateTime<Utc>) -> LimitDecision {
        state.roll_day(now);

        if state.daily_count >= self.config.per_day {
            return LimitDecision::Denied {
                reason: format!("Daily limit exceeded ({}/day)", self.config.per_day),
                retry_after: until(state.daily_reset_at, now),
            };
        }

        state.prune(now);
        if state.recent.len() >= self.config.per_minute as usize
            && let Some(oldest) = state.recent.front()
        {
            return LimitDecision::Denied {
                reason: format!("Per-minute limit exceeded ({}/min)", self.config.per_minute),
                retry_after: until(*oldest + window(), now),
            };
        }

        LimitDecision::Allowed
    }

    fn record(state: &mut QuotaState, now: DateTime<Utc>) {
        state.recent.push_back(now);
        state.daily_count = state.daily_count.saturating_add(1);
        state.last_dispatch = Some(now);
    }

    /// Decide whether a call may be dispatched now.
    pub fn check_limit(&self) -> LimitDecision {
        let now = self.clock.now();
        let decision = self.evaluate(&mut self.lock(), now);
        if let LimitDecision::Denied { reason, retry_after } = &decision {
            tracing::warn!(reason = %reason, retry_after_ms = retry_after.as_millis() as u64, "quota denied");
        }
        decision
    }

    /// Count one dispatched call against both windows.
    pub fn record_request(&self) {
        let now = self.clock.now();
        Self::record(&mut self.lock(), now);
    }

    /// Check and, when allowed, record in one step.
    pub fn check_and_record(&self) -> LimitDecision {
        let now = self.clock.now();
        let mut state = self.lock();
        let decision = self.evaluate(&mut state, now);
        if decision.is_allowed() {
            Self::record(&mut state, now);
        }
        decision
    }

    /// Time left before the minimum spacing since the last dispatch has elapsed.
    pub fn spacing_remaining(&self) -> Duration {
        let now = self.clock.now();
        let last = self.lock().last_dispatch;
        match last {
            Some(last) => self.config.min_spacing().saturating_sub(until(now, last)),
            None => Duration::ZERO,
        }
    }

    /// Suspend until the minimum spacing since the last dispatch has elapsed.
    ///
    /// Returns how long the caller was suspended.
    pub async fn wait_for_slot(&self) -> Duration {
        let _gate = self.gate.lock().await;
        self.sleep_for_spacing().await
    }

    /// Admit one dispatch: check both ceilings, wait out the spacing, then
    /// re-check and record. The gate is held throughout, so a second caller
    /// measures its spacing from the first caller's recorded dispatch.
    pub async fn acquire(&self) -> LimitDecision {
        let _gate = self.gate.lock().await;

        let decision = self.check_limit();
        if !decision.is_allowed() {
            return decision;
        }

        self.sleep_for_spacing().await;

        let decision = self.check_and_record();
        if let LimitDecision::Denied { reason, retry_after } = &decision {
            tracing::warn!(
                reason = %reason,
                retry_after_ms = retry_after.as_millis() as u64,
                "quota denied after spacing wait"
            );
        }
        decision
    }

    async fn sleep_for_spacing(&self) -> Duration {
        let wait = self.spacing_remaining();
        if !wait.is_zero() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "waiting for dispatch slot");
            tokio::time::sleep(wait).await;
        }
        wait
    }

    pub fn stats(&self) -> QuotaStats {
        let now = self.clock.now();
        let mut state = self.lock();
        state.roll_day(now);
        state.prune(now);

        let minute_used = state.recent.len() as u32;
        QuotaStats {
            minute_used,
            minute_limit: self.config.per_minute,
            minute_remaining: self.config.per_minute.saturating_sub(minute_used),
            daily_used: state.daily_count,
            daily_limit: self.config.per_day,
            daily_remaining: self.config.per_day.saturating_sub(state.daily_count),
            daily_reset_at: state.daily_reset_at.to_rfc3339(),
        }
    }

    /// Clear all counters. Intended for test isolation.
    pub fn reset(&self) {
        *self.lock() = QuotaState::new(self.clock.now());
    }

    #[cfg(test)]
    fn force_daily(&self, count: u32, reset_at: DateTime<Utc>) {
        let mut state = self.lock();
        state.daily_count = count;
        state.daily_reset_at = reset_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn limiter(per_minute: u32, per_day: u32) -> (QuotaLimiter, ManualClock) {
        let clock = ManualClock::new(start());
        let config = QuotaConfig { per_minute, per_day, min_spacing_ms: 500 };
        (QuotaLimiter::with_clock(config, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_allows_until_minute_ceiling() {
        let (limiter, clock) = limiter(15, 1_500);
        for _ in 0..15 {
            assert!(limiter.check_limit().is_allowed());
            limiter.record_request();
            clock.advance(chrono::Duration::milliseconds(100));
        }

        match limiter.check_limit() {
            LimitDecision::Denied { reason, retry_after } => {
                assert_eq!(reason, "Per-minute limit exceeded (15/min)");
                // Oldest call was 1.5s ago, so the window frees in 58.5s.
                assert_eq!(retry_after, Duration::from_millis(58_500));
            }
            LimitDecision::Allowed => panic!("expected per-minute denial"),
        }
    }

    #[test]
    fn test_window_slides() {
        let (limiter, clock) = limiter(2, 1_500);
        limiter.record_request();
        clock.advance(chrono::Duration::seconds(30));
        limiter.record_request();
        assert!(!limiter.check_limit().is_allowed());

        clock.advance(chrono::Duration::seconds(31));
        assert!(limiter.check_limit().is_allowed());
        assert_eq!(limiter.stats().minute_used, 1);
    }

    #[test]
    fn test_daily_ceiling_and_retry_after() {
        let (limiter, clock) = limiter(15, 3);
        for _ in 0..3 {
            limiter.record_request();
            clock.advance(chrono::Duration::seconds(61));
        }

        match limiter.check_limit() {
            LimitDecision::Denied { reason, retry_after } => {
                assert_eq!(reason, "Daily limit exceeded (3/day)");
                let expected = next_midnight(clock.now()) - clock.now();
                assert_eq!(retry_after, expected.to_std().unwrap());
            }
            LimitDecision::Allowed => panic!("expected daily denial"),
        }
    }

    #[test]
    fn test_daily_counter_resets_after_midnight() {
        let (limiter, clock) = limiter(15, 1_500);
        limiter.force_daily(1_500, start() - chrono::Duration::hours(1));

        assert!(limiter.check_limit().is_allowed());
        let stats = limiter.stats();
        assert_eq!(stats.daily_used, 0);
        let reset_at = DateTime::parse_from_rfc3339(&stats.daily_reset_at).unwrap().with_timezone(&Utc);
        assert!(reset_at > clock.now());
        assert_eq!(reset_at, Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_check_and_record_never_exceeds_ceiling() {
        let (limiter, _clock) = limiter(5, 1_500);
        let allowed = (0..20).filter(|_| limiter.check_and_record().is_allowed()).count();
        assert_eq!(allowed, 5);
        assert_eq!(limiter.stats().minute_used, 5);
    }

    #[test]
    fn test_denial_converts_to_rate_limit_error() {
        let (limiter, _clock) = limiter(1, 1_500);
        limiter.record_request();
        let err = limiter.check_limit().into_result().unwrap_err();
        assert!(matches!(err, Error::RateLimitExceeded { retry_after_ms: 60_000, .. }));
    }

    #[test]
    fn test_spacing_remaining() {
        let (limiter, clock) = limiter(15, 1_500);
        assert_eq!(limiter.spacing_remaining(), Duration::ZERO);

        limiter.record_request();
        clock.advance(chrono::Duration::milliseconds(200));
        assert_eq!(limiter.spacing_remaining(), Duration::from_millis(300));

        clock.advance(chrono::Duration::milliseconds(400));
        assert_eq!(limiter.spacing_remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_slot_sleeps_for_remaining_spacing() {
        let (limiter, _clock) = limiter(15, 1_500);
        assert_eq!(limiter.wait_for_slot().await, Duration::ZERO);

        limiter.record_request();
        let before = tokio::time::Instant::now();
        let waited = limiter.wait_for_slot().await;
        assert_eq!(waited, Duration::from_millis(500));
        assert!(before.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_records_after_spacing() {
        let (limiter, _clock) = limiter(2, 1_500);
        assert!(limiter.acquire().await.is_allowed());
        assert!(limiter.acquire().await.is_allowed());

        let denied = limiter.acquire().await;
        assert!(matches!(denied, LimitDecision::Denied { .. }));
        assert_eq!(limiter.stats().minute_used, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_holds_ceiling_and_spacing() {
        let config = QuotaConfig { per_minute: 3, per_day: 1_500, min_spacing_ms: 100 };
        let limiter = Arc::new(QuotaLimiter::new(config));
        let started = std::time::Instant::now();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.acquire().await.is_allowed() })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 3);
        assert_eq!(limiter.stats().minute_used, 3);
        // Three admissions need two full spacing intervals.
        assert!(started.elapsed() >= Duration::from_millis(195), "elapsed {:?}", started.elapsed());
    }

    #[test]
    fn test_stats_and_reset() {
        let (limiter, _clock) = limiter(15, 1_500);
        limiter.record_request();
        limiter.record_request();

        let stats = limiter.stats();
        assert_eq!(stats.minute_used, 2);
        assert_eq!(stats.minute_remaining, 13);
        assert_eq!(stats.daily_used, 2);
        assert_eq!(stats.daily_remaining, 1_498);

        limiter.reset();
        let stats = limiter.stats();
        assert_eq!(stats.minute_used, 0);
        assert_eq!(stats.daily_used, 0);
        assert_eq!(limiter.spacing_remaining(), Duration::ZERO);
    }
}
