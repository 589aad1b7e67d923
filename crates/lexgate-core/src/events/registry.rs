//! Hook registry and dispatcher.
//!
//! The registry holds the hooks; the dispatcher drains the broadcast channel
//! and hands every event to the matching hooks.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, error, info, warn};

use super::hooks::{HookError, SystemHook};
use super::types::SystemEvent;

/// Default timeout for hook execution.
const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Hook Registry
// ============================================================================

/// Registry for system hooks.
pub struct HookRegistry {
    hooks: RwLock<Vec<Arc<dyn SystemHook>>>,
    timeout: Duration,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_HOOK_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
            timeout,
        }
    }

    /// Register a system hook.
    pub async fn register(&self, hook: Arc<dyn SystemHook>) {
        let name = hook.name().to_string();
        self.hooks.write().await.push(hook);
        debug!(hook = %name, "Registered system hook");
    }

    pub async fn hook_count(&self) -> usize {
        self.hooks.read().await.len()
    }

    async fn matching_hooks(&self, event: &SystemEvent) -> Vec<Arc<dyn SystemHook>> {
        let hooks = self.hooks.read().await;
        hooks.iter().filter(|h| h.matches(event)).cloned().collect()
    }

    /// Dispatch an event to all matching hooks.
    ///
    /// Each hook runs in its own tokio task with a timeout and panic recovery.
    pub async fn dispatch(&self, event: &SystemEvent) {
        let hooks = self.matching_hooks(event).await;
        if hooks.is_empty() {
            return;
        }

        let timeout = self.timeout;

        for hook in hooks {
            let event = event.clone();

            tokio::spawn(async move {
                let hook_name = hook.name().to_string();

                let result = tokio::time::timeout(timeout, async {
                    AssertUnwindSafe(hook.handle(&event)).catch_unwind().await
                })
                .await;

                match result {
                    Ok(Ok(Ok(()))) => {}
                    Ok(Ok(Err(e))) => {
                        warn!(hook = %hook_name, error = %e, "Hook execution failed");
                    }
                    Ok(Err(panic)) => {
                        let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            s.to_string()
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "Unknown panic".to_string()
                        };
                        error!(hook = %hook_name, panic = %panic_msg, "Hook panicked");
                    }
                    Err(_) => {
                        error!(
                            hook = %hook_name,
                            timeout_ms = timeout.as_millis() as u64,
                            "Hook timed out"
                        );
                    }
                }
            });
        }
    }

    /// Call on_shutdown for all hooks.
    pub async fn on_shutdown(&self) -> Result<(), HookError> {
        let hooks = self.hooks.read().await;
        for hook in hooks.iter() {
            if let Err(e) = hook.on_shutdown().await {
                warn!(hook = %hook.name(), error = %e, "Hook on_shutdown failed");
            }
        }
        Ok(())
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Hook Dispatcher
// ============================================================================

/// Consumes events from a broadcast channel and routes them to hooks.
pub struct HookDispatcher {
    registry: Arc<HookRegistry>,
}

impl HookDispatcher {
    pub fn new(registry: Arc<HookRegistry>) -> Self {
        Self { registry }
    }

    /// Run until the channel is closed.
    pub async fn run(self, mut receiver: broadcast::Receiver<SystemEvent>) {
        info!("Starting hook dispatcher");

        loop {
            match receiver.recv().await {
                Ok(event) => {
                    self.registry.dispatch(&event).await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "Dispatcher lagged, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Hook dispatcher channel closed, stopping");
                    break;
                }
            }
        }

        if let Err(e) = self.registry.on_shutdown().await {
            warn!(error = %e, "Error during hook shutdown");
        }
    }

    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }
}

impl std::fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookDispatcher")
            .field("registry", &self.registry)
            .finish()
    }
}
