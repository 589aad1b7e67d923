//! Request-boundary adapter around [`RateLimiter`].

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use lexgate_core::{AdmissionEvent, EpochMillis, EventBroadcaster};

use super::identity::RequestIdentity;
use super::limiter::{RateDecision, RateLimiter};
use super::policy::RatePolicy;
use crate::error::AdmissionError;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Default fraction of the quota at which a warning fires.
pub const DEFAULT_WARN_THRESHOLD: f64 = 0.8;

/// Quota metadata for an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u32,
    pub remaining: u32,
    /// Epoch millis.
    pub reset_at: EpochMillis,
    pub degraded: bool,
}

impl Quota {
    /// Write the `X-RateLimit-*` headers.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset_at));
    }
}

impl From<&RateDecision> for Quota {
    fn from(decision: &RateDecision) -> Self {
        Self {
            limit: decision.limit,
            remaining: decision.remaining,
            reset_at: decision.reset_at,
            degraded: decision.degraded,
        }
    }
}

/// Result of passing the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// No policy applied; nothing was counted.
    Skipped,
    Admitted(Quota),
}

impl Admission {
    pub fn quota(&self) -> Option<&Quota> {
        match self {
            Admission::Skipped => None,
            Admission::Admitted(quota) => Some(quota),
        }
    }
}

/// Stateless per-request admission check.
#[derive(Debug, Clone)]
pub struct AdmissionGuard {
    limiter: Arc<RateLimiter>,
    events: Option<Arc<EventBroadcaster>>,
    warn_threshold: f64,
    enabled: bool,
}

impl AdmissionGuard {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            events: None,
            warn_threshold: DEFAULT_WARN_THRESHOLD,
            enabled: true,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBroadcaster>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_warn_threshold(mut self, threshold: f64) -> Self {
        self.warn_threshold = threshold;
        self
    }

    /// A disabled guard skips every request.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Admit or deny one request.
    ///
    /// `policy` is `None` for public operations. A denial carries everything
    /// needed for the 429 response.
    pub async fn check(
        &self,
        policy: Option<&RatePolicy>,
        identity: &RequestIdentity,
    ) -> Result<Admission, AdmissionError> {
        let Some(policy) = policy else {
            return Ok(Admission::Skipped);
        };
        if !self.enabled || policy.bypasses(identity) {
            return Ok(Admission::Skipped);
        }

        let identifier = policy.identifier(identity);
        let decision = self.limiter.check_rate(&identifier, policy).await?;

        if !decision.allowed {
            let now = self.limiter.clock().now_millis();
            return Err(AdmissionError::RateLimitExceeded {
                limit: decision.limit,
                remaining: decision.remaining,
                reset_at: decision.reset_at,
                retry_after_secs: decision.retry_after_secs(now),
            });
        }

        if !decision.degraded && decision.usage_ratio() >= self.warn_threshold {
            crate::metrics::record_quota_warning();
            if let Some(events) = &self.events {
                events.send_admission(AdmissionEvent::QuotaWarning {
                    key: self.limiter.window_key(&identifier),
                    limit: decision.limit,
                    total_requests: decision.total_requests,
                    usage_ratio: decision.usage_ratio(),
                });
            }
        }

        Ok(Admission::Admitted(Quota::from(&decision)))
    }
}
