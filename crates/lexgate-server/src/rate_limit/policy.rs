//! Rate policies and named presets.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use lexgate_core::CoreError;
use serde::{Deserialize, Serialize};

use super::identity::RequestIdentity;

/// Maps a request identity to the identifier its window is counted under.
pub type KeyFn = Arc<dyn Fn(&RequestIdentity) -> String + Send + Sync>;

/// Predicate that exempts a request from rate limiting.
pub type BypassFn = Arc<dyn Fn(&RequestIdentity) -> bool + Send + Sync>;

/// How the identifier for a request is derived.
#[derive(Clone, Default)]
pub enum KeyStrategy {
    /// Principal id when authenticated, otherwise client address.
    #[default]
    Identity,
    /// Caller-supplied function, e.g. route name plus principal.
    Custom(KeyFn),
}

impl KeyStrategy {
    pub fn identifier(&self, identity: &RequestIdentity) -> String {
        match self {
            KeyStrategy::Identity => identity.identifier(),
            KeyStrategy::Custom(f) => f(identity),
        }
    }
}

impl fmt::Debug for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStrategy::Identity => f.write_str("Identity"),
            KeyStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Named policies for common endpoint classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// 10 requests per minute
    Strict,
    /// 60 requests per minute
    Normal,
    /// 100 requests per minute
    Relaxed,
    /// 5 requests per 15 minutes, for credential endpoints
    Auth,
    /// 20 requests per minute, for expensive analysis
    Analysis,
}

impl Preset {
    pub const ALL: [Preset; 5] = [
        Preset::Strict,
        Preset::Normal,
        Preset::Relaxed,
        Preset::Auth,
        Preset::Analysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Strict => "strict",
            Preset::Normal => "normal",
            Preset::Relaxed => "relaxed",
            Preset::Auth => "auth",
            Preset::Analysis => "analysis",
        }
    }

    /// `(max_requests, window)` for this preset.
    pub fn limits(&self) -> (u32, Duration) {
        const MINUTE: Duration = Duration::from_secs(60);
        match self {
            Preset::Strict => (10, MINUTE),
            Preset::Normal => (60, MINUTE),
            Preset::Relaxed => (100, MINUTE),
            Preset::Auth => (5, Duration::from_secs(15 * 60)),
            Preset::Analysis => (20, MINUTE),
        }
    }
}

impl FromStr for Preset {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preset::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::invalid_policy(format!("unknown preset '{s}'")))
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable rate policy: at most `max_requests` per sliding `window`.
#[derive(Clone)]
pub struct RatePolicy {
    max_requests: u32,
    window: Duration,
    key_strategy: KeyStrategy,
    bypass: Option<BypassFn>,
}

impl RatePolicy {
    /// Create a policy. Both the quota and the window must be non-zero, and
    /// the window must be at least one millisecond.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self, CoreError> {
        if max_requests == 0 {
            return Err(CoreError::invalid_policy("max_requests must be > 0"));
        }
        if window.as_millis() == 0 {
            return Err(CoreError::invalid_policy("window must be at least 1ms"));
        }
        Ok(Self {
            max_requests,
            window,
            key_strategy: KeyStrategy::Identity,
            bypass: None,
        })
    }

    pub fn preset(preset: Preset) -> Self {
        let (max_requests, window) = preset.limits();
        Self {
            max_requests,
            window,
            key_strategy: KeyStrategy::Identity,
            bypass: None,
        }
    }

    pub fn strict() -> Self {
        Self::preset(Preset::Strict)
    }

    pub fn normal() -> Self {
        Self::preset(Preset::Normal)
    }

    pub fn relaxed() -> Self {
        Self::preset(Preset::Relaxed)
    }

    pub fn auth() -> Self {
        Self::preset(Preset::Auth)
    }

    pub fn analysis() -> Self {
        Self::preset(Preset::Analysis)
    }

    /// Count requests under a custom identifier.
    pub fn with_key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestIdentity) -> String + Send + Sync + 'static,
    {
        self.key_strategy = KeyStrategy::Custom(Arc::new(f));
        self
    }

    /// Skip rate limiting for requests matching `predicate`.
    pub fn with_bypass<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RequestIdentity) -> bool + Send + Sync + 'static,
    {
        self.bypass = Some(Arc::new(predicate));
        self
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }

    /// Key expiry in whole seconds, rounded up.
    pub fn expiry_secs(&self) -> u64 {
        let millis = u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX);
        millis.div_ceil(1000).max(1)
    }

    pub fn key_strategy(&self) -> &KeyStrategy {
        &self.key_strategy
    }

    pub fn identifier(&self, identity: &RequestIdentity) -> String {
        self.key_strategy.identifier(identity)
    }

    pub fn bypasses(&self, identity: &RequestIdentity) -> bool {
        self.bypass.as_ref().is_some_and(|f| f(identity))
    }
}

impl fmt::Debug for RatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RatePolicy")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .field("key_strategy", &self.key_strategy)
            .field("bypass", &self.bypass.is_some())
            .finish()
    }
}

impl From<Preset> for RatePolicy {
    fn from(preset: Preset) -> Self {
        RatePolicy::preset(preset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(RatePolicy::strict().max_requests(), 10);
        assert_eq!(RatePolicy::normal().max_requests(), 60);
        assert_eq!(RatePolicy::relaxed().max_requests(), 100);
        assert_eq!(RatePolicy::analysis().max_requests(), 20);

        let auth = RatePolicy::auth();
        assert_eq!(auth.max_requests(), 5);
        assert_eq!(auth.window(), Duration::from_secs(900));
        assert_eq!(auth.expiry_secs(), 900);
    }

    #[test]
    fn test_preset_parsing() {
        assert_eq!("STRICT".parse::<Preset>().unwrap(), Preset::Strict);
        assert_eq!("analysis".parse::<Preset>().unwrap(), Preset::Analysis);
        assert!("lenient".parse::<Preset>().is_err());
    }

    #[test]
    fn test_invalid_policy() {
        assert!(RatePolicy::new(0, Duration::from_secs(1)).is_err());
        assert!(RatePolicy::new(1, Duration::from_micros(10)).is_err());
    }

    #[test]
    fn test_expiry_rounds_up() {
        let policy = RatePolicy::new(3, Duration::from_millis(1500)).unwrap();
        assert_eq!(policy.expiry_secs(), 2);
        let policy = RatePolicy::new(3, Duration::from_millis(1)).unwrap();
        assert_eq!(policy.expiry_secs(), 1);
    }

    #[test]
    fn test_custom_key_and_bypass() {
        let policy = RatePolicy::analysis()
            .with_key_fn(|id| format!("analyze:{}", id.identifier()))
            .with_bypass(|id| id.principal_id.as_deref() == Some("admin"));

        let user = RequestIdentity::principal("u1");
        assert_eq!(policy.identifier(&user), "analyze:user:u1");
        assert!(!policy.bypasses(&user));
        assert!(policy.bypasses(&RequestIdentity::principal("admin")));
    }

    #[test]
    fn test_debug_hides_closures() {
        let policy = RatePolicy::auth()
            .with_key_fn(|id| id.identifier())
            .with_bypass(|_| false);
        let rendered = format!("{policy:?}");
        assert!(rendered.contains("max_requests: 5"));
        assert!(rendered.contains("key_strategy: Custom(..)"));
        assert!(rendered.contains("bypass: true"));
    }
}
