pub mod error;
pub mod events;
pub mod time;

pub use error::{CoreError, ErrorCategory, Result};
pub use events::{
    AdmissionEvent, CacheEvent, EventBroadcaster, MissReason, StoreEvent, SystemEvent,
};
pub use time::{Clock, EpochMillis, ManualClock, SystemClock, now_millis};
