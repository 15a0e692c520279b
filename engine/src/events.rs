//! Non-blocking fan-out of document update events to downstream replication
//! subscribers. Events are meant to be published only after the enclosing
//! transaction commits; publishing with no subscriber attached is a no-op.

use tokio::sync::broadcast;

/// A single document write, emitted after its enclosing transaction commits.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateEvent {
    pub doc_key: String,
    pub cid: Vec<u8>,
    pub schema_root: String,
    pub block: Vec<u8>,
    pub priority: u64,
}

/// Fan-out point for [`UpdateEvent`]s. Cheap to clone; every clone publishes
/// to the same set of subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<UpdateEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.sender.subscribe()
    }

    /// Publishes `event` to every current subscriber. Never blocks; if
    /// nobody is subscribed, the send is dropped on the floor.
    pub fn publish(&self, event: UpdateEvent) {
        let _ = self.sender.send(event);
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

    fn sample() -> UpdateEvent {
        UpdateEvent {
            doc_key: "doc-a".into(),
            cid: vec![1, 2, 3],
            schema_root: "root".into(),
            block: vec![4, 5],
            priority: 1,
        }
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        bus.publish(sample());
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(sample());
        let received = rx.recv().await.unwrap();
        assert_eq!(received, sample());
    }

    #[tokio::test]
    async fn events_fan_out_to_every_subscriber() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(sample());
        assert_eq!(rx1.recv().await.unwrap(), sample());
        assert_eq!(rx2.recv().await.unwrap(), sample());
    }
}
