//! Event broadcaster for the admission event system.
//!
//! The `EventBroadcaster` is the bus every component publishes to. It uses
//! tokio's broadcast channel for multi-producer, multi-consumer messaging.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::types::{AdmissionEvent, CacheEvent, StoreEvent, SystemEvent};

/// Default buffer size for the broadcast channel.
/// Events beyond this limit will cause older events to be dropped for slow receivers.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Broadcaster for system events.
///
/// Cheap to clone; all clones publish into the same channel. Sending never
/// blocks and never fails: with no subscribers the event is simply dropped.
///
/// # Example
///
/// ```
/// use lexgate_core::events::{AdmissionEvent, EventBroadcaster};
///
/// let broadcaster = EventBroadcaster::new();
/// let _receiver = broadcaster.subscribe();
///
/// broadcaster.send_admission(AdmissionEvent::WindowReset { key: "rate:u1".into() });
/// ```
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<SystemEvent>,
}

impl EventBroadcaster {
    /// Create a new broadcaster with default buffer size.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    /// Create a new broadcaster with custom buffer size.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new broadcaster wrapped in an Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Send a system event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn send(&self, event: impl Into<SystemEvent>) -> usize {
        self.sender.send(event.into()).unwrap_or_default()
    }

    pub fn send_admission(&self, event: AdmissionEvent) -> usize {
        self.send(SystemEvent::Admission(event))
    }

    pub fn send_cache(&self, event: CacheEvent) -> usize {
        self.send(SystemEvent::Cache(event))
    }

    pub fn send_store(&self, event: StoreEvent) -> usize {
        self.send(SystemEvent::Store(event))
    }

    /// Subscribe to events.
    ///
    /// Events sent before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers.
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcaster_no_subscribers() {
        let broadcaster = EventBroadcaster::new();
        assert!(!broadcaster.has_subscribers());
        let count = broadcaster.send_store(StoreEvent::new("get", "k", "down"));
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_broadcaster_send_receive() {
        let broadcaster = EventBroadcaster::new();
        let mut receiver = broadcaster.subscribe();

        broadcaster.send_admission(AdmissionEvent::WindowReset {
            key: "rate:u1".into(),
        });

        let event = receiver.recv().await.unwrap();
        match event {
            SystemEvent::Admission(AdmissionEvent::WindowReset { key }) => {
                assert_eq!(key, "rate:u1");
            }
            other => panic!("Expected WindowReset, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_broadcaster_multiple_subscribers() {
        let broadcaster = EventBroadcaster::new();
        let mut receiver1 = broadcaster.subscribe();
        let mut receiver2 = broadcaster.clone().subscribe();

        assert_eq!(broadcaster.subscriber_count(), 2);

        let count = broadcaster.send_cache(CacheEvent::DerivedHit {
            entity_id: "t1".into(),
            key: "word_count:t1".into(),
        });
        assert_eq!(count, 2);

        assert!(receiver1.recv().await.unwrap().is_cache());
        assert!(receiver2.recv().await.unwrap().is_cache());
    }
}
