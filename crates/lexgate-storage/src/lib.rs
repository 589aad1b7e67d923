//! Shared key-value store abstraction for lexgate.
//!
//! - [`StoreBackend`] is the raw async trait a concrete store implements.
//! - [`MemoryBackend`] is the in-process implementation.
//! - [`KeyValueStore`] wraps any backend with per-operation timeouts,
//!   MessagePack serialization and failure isolation.

pub mod error;
pub mod memory;
pub mod mocks;
pub mod store;
pub mod traits;
pub mod types;

use std::sync::Arc;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryBackend;
pub use store::{DEFAULT_OPERATION_TIMEOUT, KeyValueStore};
pub use traits::StoreBackend;
pub use types::{AtomicBatch, BatchOp, BatchReply, count_at};

/// Type-erased backend handle.
pub type DynBackend = Arc<dyn StoreBackend>;
