pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod rate_limit;

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use lexgate_core::EventBroadcaster;
use lexgate_core::events::{HookDispatcher, HookRegistry};
use lexgate_storage::{KeyValueStore, MemoryBackend, StoreBackend};
use serde_json::json;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

pub use cache::{DerivedResultCache, RedisBackend};
pub use config::{AppConfig, ConfigError, RedisConfig};
pub use error::AdmissionError;
pub use rate_limit::{AdmissionGuard, RateLimiter, RatePolicy};

/// Create the shared store from configuration.
///
/// Uses Redis when enabled and reachable; otherwise falls back to the
/// in-process backend, which only limits accurately for a single instance.
pub async fn create_store(config: &RedisConfig, events: Arc<EventBroadcaster>) -> KeyValueStore {
    let backend: Arc<dyn StoreBackend> = if !config.enabled {
        tracing::info!("Redis disabled, using in-process store");
        Arc::new(MemoryBackend::new())
    } else {
        tracing::info!(url = %config.url, "Connecting to Redis");
        match connect_redis(config).await {
            Ok(backend) => {
                tracing::info!("Connected to Redis");
                Arc::new(backend)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Failed to connect to Redis. Falling back to in-process store."
                );
                Arc::new(MemoryBackend::new())
            }
        }
    };

    KeyValueStore::new(backend)
        .with_timeout(config.timeout())
        .with_events(events)
}

async fn connect_redis(config: &RedisConfig) -> lexgate_storage::StoreResult<RedisBackend> {
    let backend = RedisBackend::from_config(config)?;
    tokio::time::timeout(config.timeout(), backend.ping())
        .await
        .map_err(|_| lexgate_storage::StoreError::timeout("ping", config.timeout_ms))??;
    Ok(backend)
}

/// The admission and caching components, wired to one store and event bus.
#[derive(Clone, Debug)]
pub struct Services {
    pub events: Arc<EventBroadcaster>,
    pub store: KeyValueStore,
    pub limiter: Arc<RateLimiter>,
    pub guard: Arc<AdmissionGuard>,
    pub derived: DerivedResultCache,
    /// Peers allowed to name the client through `X-Forwarded-For`.
    pub forwarded_trust: rate_limit::ForwardedTrust,
}

impl Services {
    pub async fn from_config(config: &AppConfig) -> Self {
        let events = EventBroadcaster::new_shared();
        let store = create_store(&config.redis, events.clone()).await;
        Self::with_store(config, store, events)
    }

    /// Wire components around an existing store.
    pub fn with_store(
        config: &AppConfig,
        store: KeyValueStore,
        events: Arc<EventBroadcaster>,
    ) -> Self {
        let limiter = Arc::new(
            RateLimiter::new(store.clone())
                .with_key_prefix(config.rate_limit.key_prefix.clone())
                .with_fail_mode(config.rate_limit.fail_mode)
                .with_events(events.clone()),
        );
        let guard = Arc::new(
            AdmissionGuard::new(limiter.clone())
                .with_warn_threshold(config.rate_limit.warn_threshold)
                .with_enabled(config.rate_limit.enabled)
                .with_events(events.clone()),
        );
        let derived = DerivedResultCache::new(store.clone())
            .with_default_ttl(config.cache.analysis_ttl())
            .with_events(events.clone());

        Self {
            events,
            store,
            limiter,
            guard,
            derived,
            forwarded_trust: config.rate_limit.forwarded_trust(),
        }
    }

    /// Start the dispatcher that feeds system events to the log hook.
    pub async fn spawn_event_hooks(&self) -> JoinHandle<()> {
        let registry = Arc::new(HookRegistry::new());
        registry
            .register(Arc::new(observability::EventLogHook::new()))
            .await;
        let receiver = self.events.subscribe();
        tokio::spawn(HookDispatcher::new(registry).run(receiver))
    }
}

/// Operational routes, rate limited with `policy`.
pub fn build_router(services: &Services, policy: RatePolicy) -> Router {
    let limit = middleware::RateLimitState::new(services.guard.clone(), policy)
        .with_forwarded_trust(services.forwarded_trust.clone());
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(services.store.clone())
        .layer(axum::middleware::from_fn_with_state(
            limit,
            middleware::rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

async fn health(State(store): State<KeyValueStore>) -> impl IntoResponse {
    let available = store.is_available().await;
    let status = if available { "ok" } else { "degraded" };
    Json(json!({
        "status": status,
        "store": {
            "backend": store.backend_name(),
            "available": available,
        }
    }))
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Some(body) => (StatusCode::OK, body),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}
