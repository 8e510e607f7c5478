//! Notifications raised by the link and forwarded to the application.

use crate::domain::state::ConnectionState;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Events raised by a [`SerialDevice`](crate::domain::link::SerialDevice).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The connection state changed to the given value.
    StateChange(ConnectionState),
    /// New bytes were appended to the input buffer.
    InputAvailable,
}

/// Synchronous observer of link events.
///
/// Called on whatever thread caused the event, which may be a platform
/// callback thread, while the device holds the lock that keeps events in
/// order. Implementations must not block. Calling `connect` or `disconnect`
/// on the device from inside the callback deadlocks; hand such work to
/// another thread.
pub trait LinkListener: Send + Sync {
    fn on_link_event(&self, event: LinkEvent);
}

/// Events delivered to application subscribers of the transport.
pub type TransportEvent = LinkEvent;

/// Fan-out of events to any number of channel subscribers.
#[derive(Debug, Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<TransportEvent>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Send to every live subscriber, forgetting those that hung up.
    pub fn publish(&self, event: TransportEvent) {
        self.lock().retain(|tx| tx.send(event).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let hub = EventHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.publish(LinkEvent::InputAvailable);

        assert_eq!(a.try_recv().ok(), Some(LinkEvent::InputAvailable));
        assert_eq!(b.try_recv().ok(), Some(LinkEvent::InputAvailable));
    }

    #[test]
    fn test_dropped_subscriber_is_forgotten() {
        let hub = EventHub::new();
        let rx = hub.subscribe();
        let _kept = hub.subscribe();
        drop(rx);

        hub.publish(LinkEvent::StateChange(ConnectionState::Searching));
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn test_survives_poisoned_lock() {
        let hub = std::sync::Arc::new(EventHub::new());
        let poisoner = hub.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.subscribers.lock().unwrap();
            panic!("poison the subscriber list");
        })
        .join();
        assert!(hub.subscribers.is_poisoned());

        let mut rx = hub.subscribe();
        hub.publish(LinkEvent::InputAvailable);
        assert_eq!(rx.try_recv().ok(), Some(LinkEvent::InputAvailable));
    }
}
