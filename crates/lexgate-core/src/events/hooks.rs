//! Hook traits for the admission event system.
//!
//! Hooks are asynchronous handlers that react to system events. They are
//! isolated from one another: an error or panic in one hook never reaches the
//! component that emitted the event.

use async_trait::async_trait;

use super::types::SystemEvent;

/// Error type for hook operations.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Trait for system event hooks.
///
/// # Implementation Notes
///
/// - Hooks should be quick and non-blocking
/// - Errors are logged but don't propagate to the event source
/// - Hooks run in isolated tokio tasks with panic protection
#[async_trait]
pub trait SystemHook: Send + Sync {
    /// Unique name for this hook (for logging).
    fn name(&self) -> &str;

    /// Handle a system event.
    async fn handle(&self, event: &SystemEvent) -> Result<(), HookError>;

    /// Check if this hook should handle the given event.
    fn matches(&self, _event: &SystemEvent) -> bool {
        true
    }

    /// Called when the dispatcher shuts down.
    async fn on_shutdown(&self) -> Result<(), HookError> {
        Ok(())
    }
}
