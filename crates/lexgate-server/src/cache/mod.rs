//! Shared-store backends and the derived-result cache.

pub mod backend;
pub mod derived;
pub mod keys;

pub use backend::RedisBackend;
pub use derived::{DEFAULT_DERIVED_TTL, Derived, DerivedEnvelope, DerivedResultCache, SourceState};
pub use keys::{CacheScope, ResultKind};
