//! Dispatch events for observers.

use std::time::Duration;

use hyper::StatusCode;
use tokio::sync::broadcast;

use crate::mock::MismatchDetail;

#[derive(Debug, Clone)]
pub enum MockEvent {
    RequestReceived {
        method: String,
        path: String,
    },
    Matched {
        mock_id: String,
        mock_name: Option<String>,
        status: StatusCode,
        elapsed: Duration,
    },
    NotMatched {
        method: String,
        path: String,
        closest: Option<String>,
        mismatches: Vec<MismatchDetail>,
    },
    Proxied {
        method: String,
        path: String,
        status: StatusCode,
    },
    Warning {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Non-blocking fan-out. Slow subscribers miss events instead of slowing
/// down requests.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MockEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: MockEvent) {
        // No subscribers is not an error
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MockEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(MockEvent::Warning {
            message: "nobody listens".into(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.emit(MockEvent::RequestReceived {
            method: "GET".into(),
            path: "/".into(),
        });
        match rx.recv().await.unwrap() {
            MockEvent::RequestReceived { method, path } => {
                assert_eq!(method, "GET");
                assert_eq!(path, "/");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
