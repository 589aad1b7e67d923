//! In-process backend for single-instance deployments and tests.
//!
//! Mirrors the subset of Redis semantics the admission layer relies on:
//! TTL-bearing keys, counters that start at 1, and per-key sorted collections
//! whose batches execute atomically. Atomicity comes from holding the
//! `DashMap` shard lock for the whole batch.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use lexgate_core::{Clock, EpochMillis, SystemClock};

use crate::error::{StoreError, StoreResult};
use crate::traits::StoreBackend;
use crate::types::{BatchOp, BatchReply};

#[derive(Debug, Default)]
struct SortedSet {
    by_score: BTreeSet<(i64, String)>,
    scores: HashMap<String, i64>,
}

impl SortedSet {
    fn insert(&mut self, score: i64, member: &str) -> u64 {
        match self.scores.insert(member.to_string(), score) {
            Some(previous) => {
                self.by_score.remove(&(previous, member.to_string()));
                self.by_score.insert((score, member.to_string()));
                0
            }
            None => {
                self.by_score.insert((score, member.to_string()));
                1
            }
        }
    }

    /// Remove members scored in `[min, max)`.
    fn remove_range(&mut self, min: i64, max: i64) -> u64 {
        if min >= max {
            return 0;
        }
        let doomed: Vec<(i64, String)> = self
            .by_score
            .range((min, String::new())..(max, String::new()))
            .cloned()
            .collect();
        for (score, member) in &doomed {
            self.by_score.remove(&(*score, member.clone()));
            self.scores.remove(member);
        }
        doomed.len() as u64
    }

    fn len(&self) -> u64 {
        self.by_score.len() as u64
    }

    fn is_empty(&self) -> bool {
        self.by_score.is_empty()
    }
}

#[derive(Debug)]
enum MemoryValue {
    Bytes(Vec<u8>),
    Counter(i64),
    Sorted(SortedSet),
}

#[derive(Debug)]
struct MemoryEntry {
    value: MemoryValue,
    expires_at: Option<EpochMillis>,
}

impl MemoryEntry {
    fn empty_sorted() -> Self {
        Self {
            value: MemoryValue::Sorted(SortedSet::default()),
            expires_at: None,
        }
    }

    fn is_expired(&self, now: EpochMillis) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn deadline(now: EpochMillis, ttl: Option<Duration>) -> Option<EpochMillis> {
    ttl.map(|ttl| now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)))
}

fn bump_counter(key: &str, entry: &mut MemoryEntry) -> StoreResult<i64> {
    let current = match &entry.value {
        MemoryValue::Counter(n) => *n,
        MemoryValue::Bytes(bytes) => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| StoreError::wrong_type(key, "integer"))?,
        MemoryValue::Sorted(_) => return Err(StoreError::wrong_type(key, "integer")),
    };
    let next = current
        .checked_add(1)
        .ok_or_else(|| StoreError::command("increment", "counter overflow"))?;
    entry.value = MemoryValue::Counter(next);
    Ok(next)
}

/// Writes between two sweeps of expired entries.
pub const DEFAULT_SWEEP_INTERVAL: u64 = 1024;

/// Process-local store backed by a `DashMap`.
///
/// State is not shared between processes, so this backend only gives exact
/// rate limiting for a single instance. Expired keys are dropped on access,
/// and every `sweep_interval` writes the whole map is swept so keys that are
/// never touched again do not accumulate.
pub struct MemoryBackend {
    entries: DashMap<String, MemoryEntry>,
    clock: Arc<dyn Clock>,
    writes: AtomicU64,
    sweep_interval: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a backend whose TTLs are measured against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            writes: AtomicU64::new(0),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Sweep expired entries every `writes` writes (minimum 1).
    pub fn with_sweep_interval(mut self, writes: u64) -> Self {
        self.sweep_interval = writes.max(1);
        self
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "expired entries swept");
        }
        removed
    }

    /// Count a write and sweep when the interval is reached. Must not be
    /// called while holding an entry guard.
    fn record_write(&self) {
        let n = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.sweep_interval == 0 {
            self.purge_expired();
        }
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("entries", &self.entries.len())
            .field("sweep_interval", &self.sweep_interval)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let now = self.clock.now_millis();
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if entry.is_expired(now) {
            drop(entry);
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return Ok(None);
        }
        match &entry.value {
            MemoryValue::Bytes(bytes) => Ok(Some(bytes.clone())),
            MemoryValue::Counter(n) => Ok(Some(n.to_string().into_bytes())),
            MemoryValue::Sorted(_) => Err(StoreError::wrong_type(key, "string")),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StoreResult<()> {
        let now = self.clock.now_millis();
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: MemoryValue::Bytes(value),
                expires_at: deadline(now, ttl),
            },
        );
        self.record_write();
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        let now = self.clock.now_millis();
        let removed = keys
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|(_, entry)| !entry.is_expired(now))
            .count();
        Ok(removed as u64)
    }

    async fn delete_prefix(&self, prefix: &str) -> StoreResult<u64> {
        let now = self.clock.now_millis();
        let mut removed = 0u64;
        self.entries.retain(|key, entry| {
            if key.starts_with(prefix) {
                if !entry.is_expired(now) {
                    removed += 1;
                }
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let now = self.clock.now_millis();
        Ok(self
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn increment(&self, key: &str, ttl: Option<Duration>) -> StoreResult<i64> {
        let now = self.clock.now_millis();
        let fresh = || MemoryEntry {
            value: MemoryValue::Counter(1),
            expires_at: deadline(now, ttl),
        };

        let result = match self.entries.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(fresh());
                Ok(1)
            }
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(fresh());
                    Ok(1)
                } else {
                    bump_counter(key, occupied.get_mut())
                }
            }
        };
        self.record_write();
        result
    }

    async fn run_atomic_batch(&self, key: &str, ops: &[BatchOp]) -> StoreResult<Vec<BatchReply>> {
        let now = self.clock.now_millis();
        let mut guard = self
            .entries
            .entry(key.to_string())
            .or_insert_with(MemoryEntry::empty_sorted);
        if guard.is_expired(now) {
            *guard = MemoryEntry::empty_sorted();
        }

        let MemoryEntry { value, expires_at } = guard.value_mut();
        let MemoryValue::Sorted(set) = value else {
            return Err(StoreError::wrong_type(key, "sorted set"));
        };

        let mut replies = Vec::with_capacity(ops.len());
        for op in ops {
            let reply = match op {
                BatchOp::RemoveRangeByScore { min, max } => {
                    BatchReply::Removed(set.remove_range(*min, *max))
                }
                BatchOp::Count => BatchReply::Count(set.len()),
                BatchOp::AddScored { score, member } => {
                    BatchReply::Added(set.insert(*score, member))
                }
                BatchOp::Expire { seconds } => {
                    // Like Redis, an empty collection is a missing key.
                    if set.is_empty() {
                        BatchReply::ExpireSet(false)
                    } else {
                        let ttl = Duration::from_secs(*seconds);
                        *expires_at = deadline(now, Some(ttl));
                        BatchReply::ExpireSet(true)
                    }
                }
            };
            replies.push(reply);
        }

        let empty = set.is_empty();
        drop(guard);
        if empty {
            self.entries.remove_if(key, |_, e| {
                matches!(&e.value, MemoryValue::Sorted(s) if s.is_empty())
            });
        }

        self.record_write();
        Ok(replies)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AtomicBatch;
    use lexgate_core::ManualClock;

    fn backend() -> (MemoryBackend, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        (MemoryBackend::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_set_get_with_ttl() {
        let (store, clock) = backend();
        store
            .set("k", b"v".to_vec(), Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_counts_only_existing_keys() {
        let (store, _) = backend();
        store.set("a", b"1".to_vec(), None).await.unwrap();
        let removed = store
            .delete(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let (store, _) = backend();
        for key in ["user_texts:u1:1:10", "user_texts:u1:2:10", "user_texts:u2:1:10"] {
            store.set(key, b"[]".to_vec(), None).await.unwrap();
        }
        assert_eq!(store.delete_prefix("user_texts:u1:").await.unwrap(), 2);
        assert!(store.exists("user_texts:u2:1:10").await.unwrap());
    }

    #[tokio::test]
    async fn test_increment_applies_ttl_on_create_only() {
        let (store, clock) = backend();
        let ttl = Some(Duration::from_secs(10));
        assert_eq!(store.increment("c", ttl).await.unwrap(), 1);
        clock.advance(Duration::from_secs(5));
        assert_eq!(store.increment("c", ttl).await.unwrap(), 2);
        // TTL measured from creation, not from the second increment
        clock.advance(Duration::from_secs(5));
        assert_eq!(store.increment("c", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_rejects_non_numeric() {
        let (store, _) = backend();
        store.set("s", b"hello".to_vec(), None).await.unwrap();
        let err = store.increment("s", None).await.unwrap_err();
        assert!(matches!(err, StoreError::WrongType { .. }));
    }

    #[tokio::test]
    async fn test_atomic_batch_sliding_window() {
        let (store, _) = backend();
        let run = |now: i64| {
            AtomicBatch::new()
                .remove_range_by_score(i64::MIN, now - 60_000)
                .count()
                .add_scored(now, format!("{now}-1"))
                .expire(60)
                .into_ops()
        };

        let replies = store.run_atomic_batch("w", &run(0)).await.unwrap();
        assert_eq!(
            replies,
            vec![
                BatchReply::Removed(0),
                BatchReply::Count(0),
                BatchReply::Added(1),
                BatchReply::ExpireSet(true),
            ]
        );

        let replies = store.run_atomic_batch("w", &run(10)).await.unwrap();
        assert_eq!(replies[1], BatchReply::Count(1));

        // 61s later both earlier members fall out of the window
        let replies = store.run_atomic_batch("w", &run(61_000)).await.unwrap();
        assert_eq!(replies[0], BatchReply::Removed(2));
        assert_eq!(replies[1], BatchReply::Count(0));
    }

    #[tokio::test]
    async fn test_atomic_batch_wrong_type() {
        let (store, _) = backend();
        store.set("plain", b"x".to_vec(), None).await.unwrap();
        let err = store
            .run_atomic_batch("plain", &AtomicBatch::new().count().into_ops())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::WrongType { .. }));
    }

    #[tokio::test]
    async fn test_empty_collection_is_not_kept() {
        let (store, _) = backend();
        let replies = store
            .run_atomic_batch("empty", &AtomicBatch::new().count().expire(5).into_ops())
            .await
            .unwrap();
        assert_eq!(replies, vec![BatchReply::Count(0), BatchReply::ExpireSet(false)]);
        assert!(!store.exists("empty").await.unwrap());
    }

    #[tokio::test]
    async fn test_rescoring_existing_member() {
        let (store, _) = backend();
        let ops = AtomicBatch::new()
            .add_scored(1, "m")
            .add_scored(5, "m")
            .count()
            .remove_range_by_score(i64::MIN, 5)
            .count()
            .into_ops();
        let replies = store.run_atomic_batch("z", &ops).await.unwrap();
        assert_eq!(
            replies,
            vec![
                BatchReply::Added(1),
                BatchReply::Added(0),
                BatchReply::Count(1),
                BatchReply::Removed(0),
                BatchReply::Count(1),
            ]
        );
    }

    #[tokio::test]
    async fn test_untouched_windows_are_swept() {
        let clock = ManualClock::new(0);
        let store = MemoryBackend::with_clock(Arc::new(clock.clone())).with_sweep_interval(256);

        for i in 0..10_000 {
            let ops = AtomicBatch::new().add_scored(0, "0-1").expire(60).into_ops();
            store
                .run_atomic_batch(&format!("rate:ip:{i}"), &ops)
                .await
                .unwrap();
        }
        assert_eq!(store.entries.len(), 10_000);

        clock.advance(Duration::from_secs(24 * 3600));
        let now = clock.now_millis();
        for n in 0..256 {
            let ops = AtomicBatch::new()
                .add_scored(now, format!("{now}-{n}"))
                .expire(60)
                .into_ops();
            store.run_atomic_batch("rate:ip:live", &ops).await.unwrap();
        }

        assert_eq!(store.len(), 1);
        assert_eq!(store.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_live_keys() {
        let (store, clock) = backend();
        store
            .set("short", b"1".to_vec(), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        store.set("forever", b"2".to_vec(), None).await.unwrap();
        store.increment("hits", Some(Duration::from_secs(10))).await.unwrap();

        clock.advance(Duration::from_secs(5));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.purge_expired(), 0);
        assert!(store.exists("forever").await.unwrap());
        assert!(store.exists("hits").await.unwrap());
    }

    #[tokio::test]
    async fn test_repeated_pruning_is_stable() {
        let (store, _) = backend();
        let seed = AtomicBatch::new()
            .add_scored(100, "100-a")
            .add_scored(200, "200-b")
            .add_scored(300, "300-c")
            .add_scored(400, "400-d")
            .into_ops();
        store.run_atomic_batch("w", &seed).await.unwrap();

        let prune = AtomicBatch::new()
            .remove_range_by_score(i64::MIN, 250)
            .count()
            .into_ops();
        let first = store.run_atomic_batch("w", &prune).await.unwrap();
        assert_eq!(first, vec![BatchReply::Removed(2), BatchReply::Count(2)]);

        for _ in 0..3 {
            let again = store.run_atomic_batch("w", &prune).await.unwrap();
            assert_eq!(again, vec![BatchReply::Removed(0), BatchReply::Count(2)]);
        }
    }
}
