//! Derived-result cache with staleness detection.
//!
//! A derived result (word count, full analysis, ...) for entity `E` is served
//! from cache only while `E.last_derived_at` is recorded and not older than
//! `E.last_modified_at`. The stored envelope carries its own derivation stamp,
//! which must also not predate the last modification; an entry written by a
//! slow derivation that raced an edit is therefore never served.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lexgate_core::{
    CacheEvent, Clock, CoreError, EpochMillis, EventBroadcaster, MissReason, SystemClock,
};
use lexgate_storage::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::keys::{CacheScope, ResultKind};

/// Stored form of a derived value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedEnvelope<T> {
    pub value: T,
    pub derived_at: EpochMillis,
}

/// Timestamps of the source entity, as recorded by its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceState {
    pub entity_id: String,
    pub last_modified_at: EpochMillis,
    /// When results were last derived, if ever.
    pub last_derived_at: Option<EpochMillis>,
    pub created_at: Option<EpochMillis>,
}

impl SourceState {
    pub fn new(entity_id: impl Into<String>, last_modified_at: EpochMillis) -> Self {
        Self {
            entity_id: entity_id.into(),
            last_modified_at,
            last_derived_at: None,
            created_at: None,
        }
    }

    pub fn with_last_derived_at(mut self, at: EpochMillis) -> Self {
        self.last_derived_at = Some(at);
        self
    }

    pub fn with_created_at(mut self, at: EpochMillis) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Whether cached results may be trusted at all.
    pub fn is_fresh(&self) -> bool {
        self.last_derived_at
            .is_some_and(|derived| self.last_modified_at <= derived)
    }

    /// A derivation stamp earlier than the entity's creation is impossible.
    fn contradicts(&self, derived_at: EpochMillis) -> bool {
        self.created_at.is_some_and(|created| derived_at < created)
    }
}

/// A value produced by one of the read-through helpers.
#[derive(Debug, Clone, PartialEq)]
pub struct Derived<T> {
    pub value: T,
    /// Derivation time to record as the entity's `last_derived_at`.
    pub derived_at: EpochMillis,
    pub cache_hit: bool,
}

/// TTL handed out by [`DerivedResultCache::default_ttl`] unless configured.
pub const DEFAULT_DERIVED_TTL: Duration = Duration::from_secs(3600);

/// Cache of results derived from source entities.
#[derive(Clone)]
pub struct DerivedResultCache {
    store: KeyValueStore,
    clock: Arc<dyn Clock>,
    events: Option<Arc<EventBroadcaster>>,
    default_ttl: Duration,
}

impl DerivedResultCache {
    pub fn new(store: KeyValueStore) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock::new()),
            events: None,
            default_ttl: DEFAULT_DERIVED_TTL,
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Configured lifetime for derived entries.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBroadcaster>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(events) = &self.events {
            events.send_cache(event);
        }
    }

    fn miss(&self, kind: ResultKind, source: &SourceState, key: String, reason: MissReason) {
        crate::metrics::record_derived_miss(kind.as_str(), reason.as_str());
        tracing::debug!(entity_id = %source.entity_id, key = %key, %reason, "derived cache miss");
        self.emit(CacheEvent::DerivedMiss {
            entity_id: source.entity_id.clone(),
            key,
            reason,
        });
    }

    fn violation(
        &self,
        kind: ResultKind,
        source: &SourceState,
        key: String,
        derived_at: EpochMillis,
    ) {
        let error = CoreError::invariant_violation(
            &source.entity_id,
            format!(
                "derived at {derived_at} before creation at {}",
                source.created_at.unwrap_or_default()
            ),
        );
        tracing::warn!(
            key = %key,
            category = %error.category(),
            error = %error,
            "timestamp invariant violated"
        );
        self.emit(CacheEvent::InvariantViolation {
            entity_id: source.entity_id.clone(),
            key: key.clone(),
            message: error.to_string(),
        });
        self.miss(kind, source, key, MissReason::InvariantViolation);
    }

    async fn lookup_envelope<T: DeserializeOwned>(
        &self,
        kind: ResultKind,
        source: &SourceState,
    ) -> Option<DerivedEnvelope<T>> {
        let key = kind.cache_key(&source.entity_id);

        let Some(last_derived_at) = source.last_derived_at else {
            self.miss(kind, source, key, MissReason::NeverDerived);
            return None;
        };
        if source.contradicts(last_derived_at) {
            self.violation(kind, source, key, last_derived_at);
            return None;
        }
        if !source.is_fresh() {
            self.miss(kind, source, key, MissReason::Stale);
            return None;
        }

        let Some(envelope) = self.store.get::<DerivedEnvelope<T>>(&key).await else {
            self.miss(kind, source, key, MissReason::Absent);
            return None;
        };
        if source.contradicts(envelope.derived_at) {
            self.violation(kind, source, key, envelope.derived_at);
            return None;
        }
        if envelope.derived_at < source.last_modified_at {
            self.miss(kind, source, key, MissReason::EntryPredatesModification);
            return None;
        }

        crate::metrics::record_derived_hit(kind.as_str());
        tracing::debug!(entity_id = %source.entity_id, key = %key, "derived cache hit");
        self.emit(CacheEvent::DerivedHit {
            entity_id: source.entity_id.clone(),
            key,
        });
        Some(envelope)
    }

    /// Cached `kind` result for the entity, if still valid.
    ///
    /// A never-derived entity always misses, even when a key exists.
    pub async fn lookup<T: DeserializeOwned>(
        &self,
        kind: ResultKind,
        source: &SourceState,
    ) -> Option<T> {
        self.lookup_envelope(kind, source)
            .await
            .map(|envelope| envelope.value)
    }

    /// Store a freshly derived value. Returns its derivation time, which the
    /// caller records as the entity's `last_derived_at`.
    ///
    /// A store failure is absorbed; the returned time is still valid.
    pub async fn store<T: Serialize>(
        &self,
        entity_id: &str,
        kind: ResultKind,
        value: &T,
        ttl: Duration,
    ) -> EpochMillis {
        let key = kind.cache_key(entity_id);
        let derived_at = self.clock.now_millis();
        let envelope = DerivedEnvelope { value, derived_at };
        if self.store.set(&key, &envelope, Some(ttl)).await {
            self.emit(CacheEvent::DerivedStored {
                entity_id: entity_id.to_string(),
                key,
                derived_at,
            });
        }
        derived_at
    }

    /// Drop the named kinds for an entity in one round trip.
    ///
    /// Missing keys are a no-op. Returns how many entries existed.
    pub async fn invalidate_siblings(&self, entity_id: &str, kinds: &[ResultKind]) -> u64 {
        let keys: Vec<String> = kinds.iter().map(|k| k.cache_key(entity_id)).collect();
        let removed = self.store.delete_many(&keys).await;
        tracing::debug!(entity_id = %entity_id, removed, "sibling results invalidated");
        self.emit(CacheEvent::SiblingsInvalidated {
            entity_id: entity_id.to_string(),
            keys,
        });
        removed
    }

    /// Drop every derived kind for an entity plus its dependent caches.
    ///
    /// Run whenever the source entity changes or is deleted.
    pub async fn invalidate_all(&self, entity_id: &str, dependents: &[CacheScope]) {
        let mut keys: Vec<String> = ResultKind::ALL
            .iter()
            .map(|k| k.cache_key(entity_id))
            .collect();
        let mut prefixes = Vec::new();
        for scope in dependents {
            match scope {
                CacheScope::Key(key) => keys.push(key.clone()),
                CacheScope::Prefix(prefix) => prefixes.push(prefix.clone()),
            }
        }

        let removed = self.store.delete_many(&keys).await;
        for prefix in &prefixes {
            self.store.delete_prefix(prefix).await;
        }

        tracing::debug!(
            entity_id = %entity_id,
            removed,
            prefixes = prefixes.len(),
            "entity caches invalidated"
        );
        self.emit(CacheEvent::EntityInvalidated {
            entity_id: entity_id.to_string(),
            keys,
            prefixes,
        });
    }

    /// Store the combined result, then drop the sibling kinds it supersedes.
    pub async fn store_combined<T: Serialize>(
        &self,
        entity_id: &str,
        combined: ResultKind,
        value: &T,
        ttl: Duration,
        siblings: &[ResultKind],
    ) -> EpochMillis {
        let derived_at = self.store(entity_id, combined, value, ttl).await;
        let siblings: Vec<ResultKind> = siblings
            .iter()
            .copied()
            .filter(|k| *k != combined)
            .collect();
        self.invalidate_siblings(entity_id, &siblings).await;
        derived_at
    }

    /// Read-through for a single kind: serve a valid entry, otherwise compute
    /// and store.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        kind: ResultKind,
        source: &SourceState,
        ttl: Duration,
        compute: F,
    ) -> Result<Derived<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(envelope) = self.lookup_envelope::<T>(kind, source).await {
            return Ok(Derived {
                value: envelope.value,
                derived_at: envelope.derived_at,
                cache_hit: true,
            });
        }
        let value = compute().await?;
        let derived_at = self.store(&source.entity_id, kind, &value, ttl).await;
        Ok(Derived {
            value,
            derived_at,
            cache_hit: false,
        })
    }

    /// Read-through for a combined kind. A recomputation always runs the
    /// sibling cascade, including when it replaces a stale combined entry.
    pub async fn get_or_compute_combined<T, E, F, Fut>(
        &self,
        combined: ResultKind,
        source: &SourceState,
        ttl: Duration,
        siblings: &[ResultKind],
        compute: F,
    ) -> Result<Derived<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(envelope) = self.lookup_envelope::<T>(combined, source).await {
            return Ok(Derived {
                value: envelope.value,
                derived_at: envelope.derived_at,
                cache_hit: true,
            });
        }
        let value = compute().await?;
        let derived_at = self
            .store_combined(&source.entity_id, combined, &value, ttl, siblings)
            .await;
        Ok(Derived {
            value,
            derived_at,
            cache_hit: false,
        })
    }
}

impl std::fmt::Debug for DerivedResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedResultCache")
            .field("store", &self.store)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}
