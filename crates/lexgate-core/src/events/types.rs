//! Event types emitted by the admission and caching layers.
//!
//! Components never log business or security signals directly; they emit one
//! of these typed events and an observability hook decides how to record it.
//! - `AdmissionEvent` - rate-limit decisions and degradations
//! - `CacheEvent` - derived-result cache hits, misses and invalidations
//! - `StoreEvent` - absorbed key-value store failures
//! - `SystemEvent` - unified enum combining all event types

use serde::{Deserialize, Serialize};

use crate::time::EpochMillis;

// ============================================================================
// Admission Events
// ============================================================================

/// Event produced at the request boundary by the limiter or the guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdmissionEvent {
    /// A request was denied because its window is full.
    RateLimitDenied {
        key: String,
        limit: u32,
        window_ms: u64,
        total_requests: u64,
        reset_at: EpochMillis,
    },
    /// A request was admitted but pushed usage past the warning threshold.
    QuotaWarning {
        key: String,
        limit: u32,
        total_requests: u64,
        usage_ratio: f64,
    },
    /// The store failed during a check and the limiter admitted the request anyway.
    FailedOpen { key: String, error: String },
    /// The store failed during a check and the limiter rejected the request.
    FailedClosed { key: String, error: String },
    /// A window was cleared explicitly.
    WindowReset { key: String },
}

impl AdmissionEvent {
    /// Returns the event name used for logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RateLimitDenied { .. } => "rate_limit_denied",
            Self::QuotaWarning { .. } => "quota_warning",
            Self::FailedOpen { .. } => "failed_open",
            Self::FailedClosed { .. } => "failed_closed",
            Self::WindowReset { .. } => "window_reset",
        }
    }

    /// Key of the rate window the event concerns.
    pub fn key(&self) -> &str {
        match self {
            Self::RateLimitDenied { key, .. }
            | Self::QuotaWarning { key, .. }
            | Self::FailedOpen { key, .. }
            | Self::FailedClosed { key, .. }
            | Self::WindowReset { key } => key,
        }
    }

    /// Whether the event indicates degraded enforcement.
    pub fn is_security_relevant(&self) -> bool {
        matches!(self, Self::FailedOpen { .. } | Self::RateLimitDenied { .. })
    }
}

// ============================================================================
// Cache Events
// ============================================================================

/// Why a derived-result lookup did not return a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    /// No entry stored (or the store could not be read).
    Absent,
    /// The source entity has never recorded a derivation.
    NeverDerived,
    /// The source was modified after its last recorded derivation.
    Stale,
    /// The stored entry was written before the source's last modification.
    EntryPredatesModification,
    /// The source's recorded timestamps contradict each other.
    InvariantViolation,
}

impl MissReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissReason::Absent => "absent",
            MissReason::NeverDerived => "never_derived",
            MissReason::Stale => "stale",
            MissReason::EntryPredatesModification => "entry_predates_modification",
            MissReason::InvariantViolation => "invariant_violation",
        }
    }
}

impl std::fmt::Display for MissReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event produced by the derived-result cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    DerivedHit {
        entity_id: String,
        key: String,
    },
    DerivedMiss {
        entity_id: String,
        key: String,
        reason: MissReason,
    },
    DerivedStored {
        entity_id: String,
        key: String,
        derived_at: EpochMillis,
    },
    InvariantViolation {
        entity_id: String,
        key: String,
        message: String,
    },
    SiblingsInvalidated {
        entity_id: String,
        keys: Vec<String>,
    },
    EntityInvalidated {
        entity_id: String,
        keys: Vec<String>,
        prefixes: Vec<String>,
    },
}

impl CacheEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DerivedHit { .. } => "derived_hit",
            Self::DerivedMiss { .. } => "derived_miss",
            Self::DerivedStored { .. } => "derived_stored",
            Self::InvariantViolation { .. } => "invariant_violation",
            Self::SiblingsInvalidated { .. } => "siblings_invalidated",
            Self::EntityInvalidated { .. } => "entity_invalidated",
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            Self::DerivedHit { entity_id, .. }
            | Self::DerivedMiss { entity_id, .. }
            | Self::DerivedStored { entity_id, .. }
            | Self::InvariantViolation { entity_id, .. }
            | Self::SiblingsInvalidated { entity_id, .. }
            | Self::EntityInvalidated { entity_id, .. } => entity_id,
        }
    }
}

// ============================================================================
// Store Events
// ============================================================================

/// A store failure that was absorbed instead of surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEvent {
    /// Operation name (`get`, `set`, `delete`, ...).
    pub operation: String,
    /// Key or key prefix the operation targeted.
    pub key: String,
    /// Rendered error.
    pub error: String,
}

impl StoreEvent {
    pub fn new(
        operation: impl Into<String>,
        key: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            key: key.into(),
            error: error.into(),
        }
    }
}

// ============================================================================
// Unified System Event
// ============================================================================

/// Unified event type for the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", content = "event", rename_all = "snake_case")]
pub enum SystemEvent {
    Admission(AdmissionEvent),
    Cache(CacheEvent),
    Store(StoreEvent),
}

impl SystemEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SystemEvent::Admission(e) => e.name(),
            SystemEvent::Cache(e) => e.name(),
            SystemEvent::Store(_) => "store_failure",
        }
    }

    pub fn is_admission(&self) -> bool {
        matches!(self, SystemEvent::Admission(_))
    }

    pub fn is_cache(&self) -> bool {
        matches!(self, SystemEvent::Cache(_))
    }

    pub fn is_store(&self) -> bool {
        matches!(self, SystemEvent::Store(_))
    }
}

impl From<AdmissionEvent> for SystemEvent {
    fn from(event: AdmissionEvent) -> Self {
        SystemEvent::Admission(event)
    }
}

impl From<CacheEvent> for SystemEvent {
    fn from(event: CacheEvent) -> Self {
        SystemEvent::Cache(event)
    }
}

impl From<StoreEvent> for SystemEvent {
    fn from(event: StoreEvent) -> Self {
        SystemEvent::Store(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_event_accessors() {
        let event = AdmissionEvent::RateLimitDenied {
            key: "rate:10.0.0.1".into(),
            limit: 3,
            window_ms: 60_000,
            total_requests: 4,
            reset_at: 60_030,
        };
        assert_eq!(event.name(), "rate_limit_denied");
        assert_eq!(event.key(), "rate:10.0.0.1");
        assert!(event.is_security_relevant());

        let reset = AdmissionEvent::WindowReset {
            key: "rate:user-1".into(),
        };
        assert!(!reset.is_security_relevant());
    }

    #[test]
    fn test_system_event_serialization() {
        let event: SystemEvent = CacheEvent::DerivedMiss {
            entity_id: "t1".into(),
            key: "word_count:t1".into(),
            reason: MissReason::Stale,
        }
        .into();

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "cache");
        assert_eq!(json["event"]["type"], "derived_miss");
        assert_eq!(json["event"]["reason"], "stale");

        let back: SystemEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_system_event_predicates() {
        let store: SystemEvent = StoreEvent::new("get", "k", "connection refused").into();
        assert!(store.is_store());
        assert!(!store.is_cache());
        assert_eq!(store.name(), "store_failure");
    }
}
