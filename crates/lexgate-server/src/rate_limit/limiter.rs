//! Sliding-window-log rate limiter.
//!
//! Every admitted or denied request appends one timestamped member to a
//! sorted collection keyed by identifier. A check prunes members older than
//! the window, counts what is left, appends the current request and refreshes
//! the key's expiry, all inside one atomic batch. The count is therefore exact
//! across any number of server processes sharing the store.

use std::sync::Arc;

use lexgate_core::{AdmissionEvent, Clock, EpochMillis, EventBroadcaster, SystemClock};
use lexgate_storage::{AtomicBatch, KeyValueStore, StoreError, count_at};
use serde::{Deserialize, Serialize};

use super::policy::RatePolicy;

/// Position of the count reply in the window batch.
const COUNT_REPLY: usize = 1;

/// What to do when the store cannot answer a rate check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Admit the request and mark the decision degraded.
    #[default]
    Open,
    /// Return the store error to the caller.
    Closed,
}

/// Outcome of a single rate check. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests in the window, including this one. 0 when degraded.
    pub total_requests: u64,
    pub remaining: u32,
    /// Epoch millis at which the current window ends.
    pub reset_at: EpochMillis,
    pub limit: u32,
    /// Set when the store failed and the request was admitted anyway.
    pub degraded: bool,
}

impl RateDecision {
    fn from_count(current: u64, policy: &RatePolicy, now: EpochMillis) -> Self {
        let limit = policy.max_requests();
        let total = current.saturating_add(1);
        let remaining = u64::from(limit).saturating_sub(total);
        Self {
            allowed: total <= u64::from(limit),
            total_requests: total,
            remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
            reset_at: now.saturating_add(policy.window_ms()),
            limit,
            degraded: false,
        }
    }

    fn fail_open(policy: &RatePolicy, now: EpochMillis) -> Self {
        Self {
            allowed: true,
            total_requests: 0,
            remaining: 0,
            reset_at: now,
            limit: policy.max_requests(),
            degraded: true,
        }
    }

    /// Fraction of the quota consumed, in `[0, +inf)`.
    pub fn usage_ratio(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        self.total_requests as f64 / f64::from(self.limit)
    }

    /// Whole seconds until the window resets, rounded up.
    pub fn retry_after_secs(&self, now: EpochMillis) -> u64 {
        let remaining_ms = u64::try_from(self.reset_at.saturating_sub(now)).unwrap_or(0);
        remaining_ms.div_ceil(1000)
    }
}

/// Distributed sliding-window rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    store: KeyValueStore,
    clock: Arc<dyn Clock>,
    events: Option<Arc<EventBroadcaster>>,
    key_prefix: String,
    fail_mode: FailMode,
}

impl RateLimiter {
    pub fn new(store: KeyValueStore) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock::new()),
            events: None,
            key_prefix: "rate:".to_string(),
            fail_mode: FailMode::Open,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBroadcaster>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_fail_mode(mut self, mode: FailMode) -> Self {
        self.fail_mode = mode;
        self
    }

    pub fn fail_mode(&self) -> FailMode {
        self.fail_mode
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Store key holding the window for `identifier`.
    pub fn window_key(&self, identifier: &str) -> String {
        format!("{}{}", self.key_prefix, identifier)
    }

    fn emit(&self, event: AdmissionEvent) {
        if let Some(events) = &self.events {
            events.send_admission(event);
        }
    }

    /// Count this request against `identifier`'s window and decide.
    ///
    /// Denied requests still occupy a slot in the window.
    ///
    /// Errors only in [`FailMode::Closed`]; otherwise a store failure yields a
    /// degraded, admitted decision.
    pub async fn check_rate(
        &self,
        identifier: &str,
        policy: &RatePolicy,
    ) -> Result<RateDecision, StoreError> {
        let key = self.window_key(identifier);
        let now = self.clock.now_millis();
        let window_start = now.saturating_sub(policy.window_ms());
        let member = format!("{now}-{}", rand::random::<u64>());

        let ops = AtomicBatch::new()
            .remove_range_by_score(i64::MIN, window_start)
            .count()
            .add_scored(now, member)
            .expire(policy.expiry_secs())
            .into_ops();

        let outcome = self
            .store
            .run_atomic_batch(&key, &ops)
            .await
            .and_then(|replies| count_at(&replies, COUNT_REPLY));

        let current = match outcome {
            Ok(current) => current,
            Err(e) => return self.degrade(&key, policy, now, e),
        };

        let decision = RateDecision::from_count(current, policy, now);
        crate::metrics::record_rate_decision(if decision.allowed { "allowed" } else { "denied" });
        tracing::debug!(
            key = %key,
            total = decision.total_requests,
            limit = decision.limit,
            allowed = decision.allowed,
            "rate check"
        );

        if !decision.allowed {
            self.emit(AdmissionEvent::RateLimitDenied {
                key,
                limit: decision.limit,
                window_ms: u64::try_from(policy.window_ms()).unwrap_or(0),
                total_requests: decision.total_requests,
                reset_at: decision.reset_at,
            });
        }

        Ok(decision)
    }

    fn degrade(
        &self,
        key: &str,
        policy: &RatePolicy,
        now: EpochMillis,
        error: StoreError,
    ) -> Result<RateDecision, StoreError> {
        match self.fail_mode {
            FailMode::Open => {
                crate::metrics::record_rate_decision("degraded");
                self.emit(AdmissionEvent::FailedOpen {
                    key: key.to_string(),
                    error: error.to_string(),
                });
                Ok(RateDecision::fail_open(policy, now))
            }
            FailMode::Closed => {
                crate::metrics::record_rate_decision("rejected");
                self.emit(AdmissionEvent::FailedClosed {
                    key: key.to_string(),
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    /// Forget every request recorded for `identifier`. Best-effort.
    pub async fn reset(&self, identifier: &str) {
        let key = self.window_key(identifier);
        self.store.delete(&key).await;
        self.emit(AdmissionEvent::WindowReset { key });
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("store", &self.store)
            .field("key_prefix", &self.key_prefix)
            .field("fail_mode", &self.fail_mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexgate_core::{ManualClock, SystemEvent};
    use lexgate_storage::MemoryBackend;
    use lexgate_storage::mocks::UnavailableBackend;
    use std::time::Duration;

    fn limiter_at(start: EpochMillis) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new(start);
        let backend = MemoryBackend::with_clock(Arc::new(clock.clone()));
        let limiter =
            RateLimiter::new(KeyValueStore::new(Arc::new(backend))).with_clock(Arc::new(clock.clone()));
        (limiter, clock)
    }

    #[tokio::test]
    async fn test_decision_arithmetic() {
        let (limiter, _) = limiter_at(10_000);
        let policy = RatePolicy::new(2, Duration::from_secs(1)).unwrap();

        let first = limiter.check_rate("c", &policy).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.total_requests, 1);
        assert_eq!(first.remaining, 1);
        assert_eq!(first.reset_at, 11_000);
        assert!(!first.degraded);

        limiter.check_rate("c", &policy).await.unwrap();
        let third = limiter.check_rate("c", &policy).await.unwrap();
        assert!(!third.allowed);
        assert_eq!(third.total_requests, 3);
        assert_eq!(third.remaining, 0);
    }

    #[tokio::test]
    async fn test_boundary_member_leaves_window() {
        let (limiter, clock) = limiter_at(0);
        let policy = RatePolicy::new(1, Duration::from_millis(100)).unwrap();

        assert!(limiter.check_rate("b", &policy).await.unwrap().allowed);
        clock.set(99);
        assert!(!limiter.check_rate("b", &policy).await.unwrap().allowed);
        // At t=100 the window starts at 0; a member scored exactly 0 is kept.
        clock.set(100);
        assert!(!limiter.check_rate("b", &policy).await.unwrap().allowed);
        // At t=200 everything recorded before t=100 is pruned.
        clock.set(200);
        let decision = limiter.check_rate("b", &policy).await.unwrap();
        assert_eq!(decision.total_requests, 2);
    }

    #[tokio::test]
    async fn test_fail_open_emits_event() {
        let events = EventBroadcaster::new_shared();
        let mut rx = events.subscribe();
        let limiter = RateLimiter::new(KeyValueStore::new(Arc::new(UnavailableBackend::new())))
            .with_clock(Arc::new(ManualClock::new(5_000)))
            .with_events(events);

        let decision = limiter.check_rate("x", &RatePolicy::strict()).await.unwrap();
        assert_eq!(
            decision,
            RateDecision {
                allowed: true,
                total_requests: 0,
                remaining: 0,
                reset_at: 5_000,
                limit: 10,
                degraded: true,
            }
        );

        match rx.recv().await.unwrap() {
            SystemEvent::Admission(AdmissionEvent::FailedOpen { key, .. }) => {
                assert_eq!(key, "rate:x");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fail_closed_returns_error() {
        let limiter = RateLimiter::new(KeyValueStore::new(Arc::new(UnavailableBackend::new())))
            .with_fail_mode(FailMode::Closed);
        let err = limiter
            .check_rate("x", &RatePolicy::strict())
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_reset_clears_window() {
        let (limiter, _) = limiter_at(1_000);
        let policy = RatePolicy::new(1, Duration::from_secs(60)).unwrap();
        limiter.check_rate("r", &policy).await.unwrap();
        assert!(!limiter.check_rate("r", &policy).await.unwrap().allowed);

        limiter.reset("r").await;
        assert!(limiter.check_rate("r", &policy).await.unwrap().allowed);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let decision = RateDecision {
            allowed: false,
            total_requests: 4,
            remaining: 0,
            reset_at: 10_001,
            limit: 3,
            degraded: false,
        };
        assert_eq!(decision.retry_after_secs(9_000), 2);
        assert_eq!(decision.retry_after_secs(10_001), 0);
        assert_eq!(decision.retry_after_secs(20_000), 0);
    }

    #[test]
    fn test_custom_prefix() {
        let limiter = RateLimiter::new(KeyValueStore::new(Arc::new(MemoryBackend::new())))
            .with_key_prefix("rl:");
        assert_eq!(limiter.window_key("user:1"), "rl:user:1");
    }
}
