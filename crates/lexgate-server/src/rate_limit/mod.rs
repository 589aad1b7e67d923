//! Distributed admission control.
//!
//! - [`RatePolicy`]: quota, window and key strategy for an operation
//! - [`RateLimiter`]: sliding-window-log check against the shared store
//! - [`AdmissionGuard`]: applies a policy to a request identity

mod guard;
mod identity;
mod limiter;
mod policy;

pub use guard::{
    Admission, AdmissionGuard, DEFAULT_WARN_THRESHOLD, Quota, X_RATELIMIT_LIMIT,
    X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use identity::{ForwardedTrust, Principal, RequestIdentity, X_FORWARDED_FOR, forwarded_client_ip};
pub use limiter::{FailMode, RateDecision, RateLimiter};
pub use policy::{BypassFn, KeyFn, KeyStrategy, Preset, RatePolicy};
