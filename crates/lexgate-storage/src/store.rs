//! Failure-isolating facade over a [`StoreBackend`].
//!
//! Cache reads and writes must never take a request down, so most operations
//! here absorb backend errors: reads become misses, writes report `false`,
//! deletes are best-effort. Each absorbed failure is logged and published as a
//! [`StoreEvent`]. The counting paths (`increment`, `run_atomic_batch`) return
//! the error instead, because only the caller knows whether to fail open.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lexgate_core::{EventBroadcaster, StoreEvent};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{StoreError, StoreResult};
use crate::traits::StoreBackend;
use crate::types::{BatchOp, BatchReply};

/// Default per-operation deadline.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(1000);

/// Shared handle to the key-value store.
///
/// Cheap to clone; all clones share the backend and event bus.
#[derive(Clone)]
pub struct KeyValueStore {
    backend: Arc<dyn StoreBackend>,
    timeout: Duration,
    events: Option<Arc<EventBroadcaster>>,
}

impl KeyValueStore {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            timeout: DEFAULT_OPERATION_TIMEOUT,
            events: None,
        }
    }

    /// Bound every backend call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Publish absorbed failures on `events`.
    pub fn with_events(mut self, events: Arc<EventBroadcaster>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::timeout(
                operation,
                u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }

    fn absorb(&self, operation: &'static str, key: &str, error: &StoreError) {
        tracing::warn!(
            backend = self.backend.name(),
            operation,
            key = %key,
            error = %error,
            "store operation failed, continuing without cache"
        );
        if let Some(events) = &self.events {
            events.send_store(StoreEvent::new(operation, key, error.to_string()));
        }
    }

    /// Read and decode a value. Any failure, including a payload that no
    /// longer decodes as `T`, is reported as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get_raw(key).await?;
        match rmp_serde::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                self.absorb("get", key, &StoreError::serialization(e.to_string()));
                None
            }
        }
    }

    /// Read raw bytes. Failures are reported as absent.
    pub async fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        match self.bounded("get", self.backend.get(key)).await {
            Ok(value) => value,
            Err(e) => {
                self.absorb("get", key, &e);
                None
            }
        }
    }

    /// Encode and write a value. Returns `false` if nothing was written.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        let bytes = match rmp_serde::to_vec_named(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.absorb("set", key, &StoreError::serialization(e.to_string()));
                return false;
            }
        };
        self.set_raw(key, bytes, ttl).await
    }

    /// Write raw bytes. Returns `false` if nothing was written.
    pub async fn set_raw(&self, key: &str, bytes: Vec<u8>, ttl: Option<Duration>) -> bool {
        match self.bounded("set", self.backend.set(key, bytes, ttl)).await {
            Ok(()) => true,
            Err(e) => {
                self.absorb("set", key, &e);
                false
            }
        }
    }

    /// Best-effort delete. Missing keys are a no-op.
    pub async fn delete(&self, key: &str) {
        self.delete_many(&[key.to_string()]).await;
    }

    /// Best-effort delete of several keys in one round trip.
    ///
    /// Returns how many keys existed, or 0 if the delete failed.
    pub async fn delete_many(&self, keys: &[String]) -> u64 {
        if keys.is_empty() {
            return 0;
        }
        match self.bounded("delete", self.backend.delete(keys)).await {
            Ok(removed) => removed,
            Err(e) => {
                self.absorb("delete", &keys.join(","), &e);
                0
            }
        }
    }

    /// Best-effort delete of every key starting with `prefix`.
    pub async fn delete_prefix(&self, prefix: &str) -> u64 {
        match self
            .bounded("delete_prefix", self.backend.delete_prefix(prefix))
            .await
        {
            Ok(removed) => removed,
            Err(e) => {
                self.absorb("delete_prefix", prefix, &e);
                0
            }
        }
    }

    /// Whether `key` exists. `false` when the store cannot answer.
    pub async fn exists(&self, key: &str) -> bool {
        match self.bounded("exists", self.backend.exists(key)).await {
            Ok(found) => found,
            Err(e) => {
                self.absorb("exists", key, &e);
                false
            }
        }
    }

    /// Atomically increment a counter. `ttl` applies only when the counter is
    /// created.
    pub async fn increment(&self, key: &str, ttl: Option<Duration>) -> StoreResult<i64> {
        self.bounded("increment", self.backend.increment(key, ttl))
            .await
    }

    /// Run `ops` against `key` as one indivisible unit.
    pub async fn run_atomic_batch(
        &self,
        key: &str,
        ops: &[BatchOp],
    ) -> StoreResult<Vec<BatchReply>> {
        let replies = self
            .bounded("atomic_batch", self.backend.run_atomic_batch(key, ops))
            .await?;
        if replies.len() != ops.len() {
            return Err(StoreError::unexpected_reply(
                "atomic_batch",
                format!("sent {} operations, got {} replies", ops.len(), replies.len()),
            ));
        }
        Ok(replies)
    }

    /// Health probe.
    pub async fn is_available(&self) -> bool {
        match self.bounded("ping", self.backend.ping()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(backend = self.backend.name(), error = %e, "store ping failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for KeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueStore")
            .field("backend", &self.backend.name())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
