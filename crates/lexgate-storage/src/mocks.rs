//! Backends that misbehave on purpose, for exercising degradation paths.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::traits::StoreBackend;
use crate::types::{BatchOp, BatchReply};

/// Backend whose every call fails with a connection error.
#[derive(Debug, Clone, Default)]
pub struct UnavailableBackend {
    message: String,
}

impl UnavailableBackend {
    pub fn new() -> Self {
        Self::with_message("connection refused")
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    fn fail<T>(&self) -> StoreResult<T> {
        Err(StoreError::connection(self.message.clone()))
    }
}

#[async_trait]
impl StoreBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn get(&self, _key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.fail()
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> StoreResult<()> {
        self.fail()
    }

    async fn delete(&self, _keys: &[String]) -> StoreResult<u64> {
        self.fail()
    }

    async fn delete_prefix(&self, _prefix: &str) -> StoreResult<u64> {
        self.fail()
    }

    async fn exists(&self, _key: &str) -> StoreResult<bool> {
        self.fail()
    }

    async fn increment(&self, _key: &str, _ttl: Option<Duration>) -> StoreResult<i64> {
        self.fail()
    }

    async fn run_atomic_batch(&self, _key: &str, _ops: &[BatchOp]) -> StoreResult<Vec<BatchReply>> {
        self.fail()
    }

    async fn ping(&self) -> StoreResult<()> {
        self.fail()
    }
}

/// Backend that hangs for `delay` before answering as if empty.
///
/// Pair it with a shorter operation timeout to simulate a store that has
/// stopped responding.
#[derive(Debug, Clone)]
pub struct StalledBackend {
    delay: Duration,
}

impl StalledBackend {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    async fn stall(&self) {
        tokio::time::sleep(self.delay).await;
    }
}

#[async_trait]
impl StoreBackend for StalledBackend {
    fn name(&self) -> &'static str {
        "stalled"
    }

    async fn get(&self, _key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.stall().await;
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> StoreResult<()> {
        self.stall().await;
        Ok(())
    }

    async fn delete(&self, _keys: &[String]) -> StoreResult<u64> {
        self.stall().await;
        Ok(0)
    }

    async fn delete_prefix(&self, _prefix: &str) -> StoreResult<u64> {
        self.stall().await;
        Ok(0)
    }

    async fn exists(&self, _key: &str) -> StoreResult<bool> {
        self.stall().await;
        Ok(false)
    }

    async fn increment(&self, _key: &str, _ttl: Option<Duration>) -> StoreResult<i64> {
        self.stall().await;
        Ok(1)
    }

    async fn run_atomic_batch(&self, _key: &str, ops: &[BatchOp]) -> StoreResult<Vec<BatchReply>> {
        self.stall().await;
        Ok(ops
            .iter()
            .map(|op| match op {
                BatchOp::RemoveRangeByScore { .. } => BatchReply::Removed(0),
                BatchOp::Count => BatchReply::Count(0),
                BatchOp::AddScored { .. } => BatchReply::Added(1),
                BatchOp::Expire { .. } => BatchReply::ExpireSet(true),
            })
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.stall().await;
        Ok(())
    }
}
