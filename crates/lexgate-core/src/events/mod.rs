//! Typed event bus for the admission and caching layers.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    Event Broadcaster                        │
//! │              (tokio::sync::broadcast channel)               │
//! └────────────────────────────────────────────────────────────┘
//!        │                      │                      │
//!        ▼                      ▼                      ▼
//!   ┌──────────┐          ┌──────────┐          ┌──────────┐
//!   │ log hook │          │ metrics  │          │  custom  │
//!   └──────────┘          └──────────┘          └──────────┘
//! ```
//!
//! The limiter, guard, store wrapper and derived-result cache publish typed
//! events instead of calling a logging framework. Subscribers decide what to
//! do with them.
//!
//! # Module Structure
//!
//! - [`types`]: Event type definitions (`AdmissionEvent`, `CacheEvent`, `StoreEvent`, `SystemEvent`)
//! - [`broadcaster`]: Event broadcasting infrastructure
//! - [`hooks`]: Hook trait and error type
//! - [`registry`]: Hook registry and dispatcher

pub mod broadcaster;
pub mod hooks;
pub mod registry;
pub mod types;

pub use broadcaster::EventBroadcaster;
pub use hooks::{HookError, SystemHook};
pub use registry::{HookDispatcher, HookRegistry};
pub use types::{AdmissionEvent, CacheEvent, MissReason, StoreEvent, SystemEvent};
