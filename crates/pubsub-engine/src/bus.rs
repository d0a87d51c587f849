//! Broadcast of engine happenings for a presentation layer.
//!
//! Publishing never blocks and never fails: with no subscribers the event is
//! simply dropped, and a slow subscriber sees `Lagged` rather than slowing
//! the engine down.

use tokio::sync::broadcast;

use crate::relay::ConnectionState;

const BUS_CAPACITY: usize = 256;

/// Something a UI might want to show.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ConnectionStateChanged {
        configuration_id: String,
        relay_url: String,
        state: ConnectionState,
    },
    EventDelivered {
        configuration_id: String,
        event_id: String,
        destination_uri: String,
    },
    Notice {
        relay_url: String,
        message: String,
    },
    HealthChecked {
        total: usize,
        healthy: usize,
        unhealthy: usize,
    },
    RefreshIssued {
        connections: usize,
    },
}

/// Cloneable handle to the broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        // Err only means nobody is listening
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(EngineEvent::RefreshIssued { connections: 1 });
    }

    #[test]
    fn test_subscriber_receives() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(EngineEvent::Notice {
            relay_url: "wss://r".to_string(),
            message: "hi".to_string(),
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            EngineEvent::Notice {
                relay_url: "wss://r".to_string(),
                message: "hi".to_string(),
            }
        );
    }
}
