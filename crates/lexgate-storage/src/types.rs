//! Operation and reply types for atomic batches.

use crate::error::{StoreError, StoreResult};

/// A single operation inside an atomic batch.
///
/// All operations in a batch target the same key's sorted-by-score
/// collection. Scores are epoch milliseconds in practice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Remove members whose score lies in `[min, max)`.
    ///
    /// `i64::MIN` as `min` means unbounded below.
    RemoveRangeByScore { min: i64, max: i64 },
    /// Count the members currently in the collection.
    Count,
    /// Add (or re-score) a member.
    AddScored { score: i64, member: String },
    /// Set the key's time-to-live in seconds.
    Expire { seconds: u64 },
}

impl BatchOp {
    /// Operation name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            BatchOp::RemoveRangeByScore { .. } => "remove_range_by_score",
            BatchOp::Count => "count",
            BatchOp::AddScored { .. } => "add_scored",
            BatchOp::Expire { .. } => "expire",
        }
    }
}

/// The per-operation result of an atomic batch, in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchReply {
    /// Number of members removed.
    Removed(u64),
    /// Number of members counted.
    Count(u64),
    /// Number of members newly added (0 when an existing member was re-scored).
    Added(u64),
    /// Whether the expiry was applied.
    ExpireSet(bool),
}

impl BatchReply {
    /// Numeric value of the reply, if it carries one.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            BatchReply::Removed(n) | BatchReply::Count(n) | BatchReply::Added(n) => Some(*n),
            BatchReply::ExpireSet(_) => None,
        }
    }
}

/// Builder for an ordered list of batch operations.
///
/// ```
/// use lexgate_storage::AtomicBatch;
///
/// let ops = AtomicBatch::new()
///     .remove_range_by_score(i64::MIN, 1_000)
///     .count()
///     .add_scored(61_000, "61000-42")
///     .expire(60)
///     .into_ops();
/// assert_eq!(ops.len(), 4);
/// ```
#[derive(Debug, Clone, Default)]
pub struct AtomicBatch {
    ops: Vec<BatchOp>,
}

impl AtomicBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove_range_by_score(mut self, min: i64, max: i64) -> Self {
        self.ops.push(BatchOp::RemoveRangeByScore { min, max });
        self
    }

    pub fn count(mut self) -> Self {
        self.ops.push(BatchOp::Count);
        self
    }

    pub fn add_scored(mut self, score: i64, member: impl Into<String>) -> Self {
        self.ops.push(BatchOp::AddScored {
            score,
            member: member.into(),
        });
        self
    }

    pub fn expire(mut self, seconds: u64) -> Self {
        self.ops.push(BatchOp::Expire { seconds });
        self
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Pull the count reply at `index` out of a batch result.
pub fn count_at(replies: &[BatchReply], index: usize) -> StoreResult<u64> {
    match replies.get(index) {
        Some(BatchReply::Count(n)) => Ok(*n),
        Some(other) => Err(StoreError::unexpected_reply(
            "atomic_batch",
            format!("expected count at position {index}, got {other:?}"),
        )),
        None => Err(StoreError::unexpected_reply(
            "atomic_batch",
            format!("missing reply at position {index} (got {})", replies.len()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_at() {
        let replies = [
            BatchReply::Removed(2),
            BatchReply::Count(5),
            BatchReply::Added(1),
            BatchReply::ExpireSet(true),
        ];
        assert_eq!(count_at(&replies, 1).unwrap(), 5);
        assert!(count_at(&replies, 0).is_err());
        assert!(count_at(&replies, 9).is_err());
    }

    #[test]
    fn test_reply_values() {
        assert_eq!(BatchReply::Added(1).as_u64(), Some(1));
        assert_eq!(BatchReply::ExpireSet(true).as_u64(), None);
        assert_eq!(BatchOp::Count.name(), "count");
    }
}
