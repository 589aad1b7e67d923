//! The backend trait every shared-store implementation provides.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{BatchOp, BatchReply};

/// Raw operations against a shared key-value store.
///
/// Backends report every failure as an error. Deciding which failures are
/// absorbed and which are surfaced is the job of [`crate::KeyValueStore`],
/// not of the backend.
///
/// Implementations must be thread-safe (`Send + Sync`) and hold one
/// long-lived connection handle or pool; no per-call connection setup.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Short backend name for logs and health output (`"redis"`, `"memory"`).
    fn name(&self) -> &'static str;

    /// Read a value. `None` if the key is absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Write a value, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StoreResult<()>;

    /// Delete keys in one round trip. Returns how many existed.
    ///
    /// Missing keys are not an error.
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    /// Delete every key starting with `prefix`. Returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> StoreResult<u64>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Atomically increment a counter, creating it at 1.
    ///
    /// `ttl` is applied only when the counter is created.
    async fn increment(&self, key: &str, ttl: Option<Duration>) -> StoreResult<i64>;

    /// Execute `ops` against the sorted collection at `key` as one indivisible
    /// unit. No other client observes or interleaves with intermediate state.
    async fn run_atomic_batch(&self, key: &str, ops: &[BatchOp]) -> StoreResult<Vec<BatchReply>>;

    /// Round-trip health probe.
    async fn ping(&self) -> StoreResult<()>;
}
