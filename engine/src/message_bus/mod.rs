//! Message Bus for turn and session events
//!
//! The MessageBus provides a pub/sub pattern so transports can stream turn
//! results without coupling to the orchestrator. It uses bounded channels
//! to prevent unbounded memory growth and supports both specific event
//! subscriptions and global "All" subscriptions.
//!
//! Publishing never waits on a slow subscriber: a full channel drops the
//! event for that subscriber only.

use sdk::errors::ErrorKind;
use sdk::response::Response;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Channel buffer size for bounded channels
const CHANNEL_BUFFER_SIZE: usize = 100;

/// Event types that can be published on the message bus
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventType {
    /// A session was created by a turn
    SessionCreated,
    /// A turn produced a response
    TurnCompleted,
    /// A turn failed at some stage
    TurnFailed,
    /// A session was ended explicitly
    SessionEnded,
    /// A sweep ended idle sessions
    SessionsExpired,
    /// Subscribe to all event types
    All,
}

/// Events that can be published on the message bus
#[derive(Debug, Clone)]
pub enum Event {
    SessionCreated { session_id: String },
    /// Same envelope the caller received
    TurnCompleted { response: Box<Response> },
    TurnFailed {
        session_id: Option<String>,
        request_id: String,
        kind: ErrorKind,
        error: String,
    },
    SessionEnded { session_id: String },
    SessionsExpired { session_ids: Vec<String> },
}

impl Event {
    /// Get the event type for this event
    pub fn event_type(&self) -> EventType {
        match self {
            Event::SessionCreated { .. } => EventType::SessionCreated,
            Event::TurnCompleted { .. } => EventType::TurnCompleted,
            Event::TurnFailed { .. } => EventType::TurnFailed,
            Event::SessionEnded { .. } => EventType::SessionEnded,
            Event::SessionsExpired { .. } => EventType::SessionsExpired,
        }
    }
}

/// Message bus for pub/sub communication between components
pub struct MessageBus {
    /// Each subscriber gets a bounded channel with CHANNEL_BUFFER_SIZE capacity
    channels: Arc<Mutex<HashMap<EventType, Vec<mpsc::Sender<Event>>>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to a specific event type, or EventType::All for all events
    pub async fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let mut channels = self.channels.lock().await;
        channels.entry(event_type).or_default().push(tx);
        rx
    }

    /// Publish an event to subscribers of its type and of EventType::All
    ///
    /// Closed subscribers are pruned.
    pub async fn publish(&self, event: Event) {
        let mut channels = self.channels.lock().await;
        let event_type = event.event_type();

        for key in [event_type, EventType::All] {
            if let Some(subscribers) = channels.get_mut(&key) {
                subscribers.retain(|tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(?event_type, "Subscriber channel full, event dropped");
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        }
    }

    /// Number of live subscriptions across all event types
    pub async fn subscriber_count(&self) -> usize {
        let channels = self.channels.lock().await;
        channels
            .values()
            .flat_map(|subs| subs.iter())
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_and_publish() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe(EventType::SessionEnded).await;

        bus.publish(Event::SessionEnded {
            session_id: "s-1".to_string(),
        })
        .await;

        match rx.recv().await.unwrap() {
            Event::SessionEnded { session_id } => assert_eq!(session_id, "s-1"),
            _ => panic!("Wrong event type received"),
        }
    }

    #[tokio::test]
    async fn test_all_event_type() {
        let bus = MessageBus::new();
        let mut rx_all = bus.subscribe(EventType::All).await;
        let mut rx_specific = bus.subscribe(EventType::SessionCreated).await;

        bus.publish(Event::SessionCreated {
            session_id: "s-2".to_string(),
        })
        .await;

        assert!(matches!(
            rx_all.recv().await.unwrap(),
            Event::SessionCreated { .. }
        ));
        assert!(matches!(
            rx_specific.recv().await.unwrap(),
            Event::SessionCreated { .. }
        ));
    }

    #[tokio::test]
    async fn test_different_event_types() {
        let bus = MessageBus::new();
        let mut rx_ended = bus.subscribe(EventType::SessionEnded).await;
        let mut rx_expired = bus.subscribe(EventType::SessionsExpired).await;

        bus.publish(Event::SessionsExpired {
            session_ids: vec!["a".to_string(), "b".to_string()],
        })
        .await;

        match rx_expired.recv().await.unwrap() {
            Event::SessionsExpired { session_ids } => assert_eq!(session_ids.len(), 2),
            _ => panic!("Wrong event type"),
        }
        assert!(rx_ended.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_channel_does_not_block() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe(EventType::SessionEnded).await;

        for i in 0..CHANNEL_BUFFER_SIZE + 10 {
            bus.publish(Event::SessionEnded {
                session_id: format!("s-{}", i),
            })
            .await;
        }

        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, CHANNEL_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_dropped_subscribers_are_pruned() {
        let bus = MessageBus::new();
        let rx = bus.subscribe(EventType::SessionEnded).await;
        let _keep = bus.subscribe(EventType::All).await;
        drop(rx);

        bus.publish(Event::SessionEnded {
            session_id: "s".to_string(),
        })
        .await;

        assert_eq!(bus.subscriber_count().await, 1);
    }
}
