// Tracing initialization with a reloadable log level, plus the hook that turns
// system events into log records.
use std::sync::OnceLock;

use async_trait::async_trait;
use lexgate_core::events::{HookError, SystemHook};
use lexgate_core::{AdmissionEvent, CacheEvent, SystemEvent};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

pub fn init_tracing() {
    init_tracing_with_level("info");
}

pub fn init_tracing_with_level(level: &str) {
    // Prefer RUST_LOG from env, otherwise use provided level string.
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer())
        .try_init();
}

/// Apply a new logging level at runtime if reload handle is configured.
pub fn apply_logging_level(level: &str) {
    if let Some(handle) = LOG_RELOAD_HANDLE.get() {
        let _ = handle.modify(|f| {
            *f = EnvFilter::new(level);
        });
    }
}

/// Logs every system event at a level matching its severity.
///
/// Denials, degraded decisions and invariant violations are `warn`; routine
/// cache traffic is `debug`. Absorbed store failures are already logged where
/// they happen, so only their counter is recorded here.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventLogHook;

impl EventLogHook {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SystemHook for EventLogHook {
    fn name(&self) -> &str {
        "event_log"
    }

    async fn handle(&self, event: &SystemEvent) -> Result<(), HookError> {
        log_event(event);
        Ok(())
    }
}

pub fn log_event(event: &SystemEvent) {
    match event {
        SystemEvent::Admission(event) => log_admission(event),
        SystemEvent::Cache(event) => log_cache(event),
        SystemEvent::Store(event) => {
            crate::metrics::record_store_degraded(event.operation.clone());
        }
    }
}

fn log_admission(event: &AdmissionEvent) {
    match event {
        AdmissionEvent::RateLimitDenied {
            key,
            limit,
            window_ms,
            total_requests,
            reset_at,
        } => {
            tracing::warn!(
                key = %key,
                limit,
                window_ms,
                total_requests,
                reset_at,
                "rate limit exceeded"
            );
        }
        AdmissionEvent::QuotaWarning {
            key,
            limit,
            total_requests,
            usage_ratio,
        } => {
            tracing::warn!(key = %key, limit, total_requests, usage_ratio, "quota nearly exhausted");
        }
        AdmissionEvent::FailedOpen { key, error } => {
            tracing::warn!(key = %key, error = %error, "rate check failed, admitting request");
        }
        AdmissionEvent::FailedClosed { key, error } => {
            tracing::error!(key = %key, error = %error, "rate check failed, rejecting request");
        }
        AdmissionEvent::WindowReset { key } => {
            tracing::info!(key = %key, "rate limit window reset");
        }
    }
}

fn log_cache(event: &CacheEvent) {
    match event {
        CacheEvent::InvariantViolation {
            entity_id,
            key,
            message,
        } => {
            tracing::warn!(entity_id = %entity_id, key = %key, %message, "derived result rejected");
        }
        CacheEvent::EntityInvalidated {
            entity_id,
            keys,
            prefixes,
        } => {
            tracing::info!(
                entity_id = %entity_id,
                keys = keys.len(),
                prefixes = ?prefixes,
                "entity caches invalidated"
            );
        }
        other => {
            tracing::debug!(event = other.name(), entity_id = %other.entity_id(), "derived cache event");
        }
    }
}
