//! Change notification fan-out.

use quarry_engine::ChangeEvent;
use tokio::sync::broadcast;

/// Receives an event for every change confirmed by the remote backend.
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self, event: ChangeEvent);
}

/// Fans events out to any number of in-process subscribers.
///
/// Slow subscribers lag and lose the oldest events rather than blocking
/// the sender.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<ChangeEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ChangeNotifier for BroadcastNotifier {
    fn notify(&self, event: ChangeEvent) {
        // no subscribers is fine
        let receivers = self.sender.send(event).unwrap_or(0);
        tracing::trace!(receivers, "Change event broadcast");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_engine::{KeyValue, MutationKind};

    #[tokio::test]
    async fn test_every_subscriber_sees_events() {
        let notifier = BroadcastNotifier::new(8);
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();

        let event = ChangeEvent::new("customers", Some(KeyValue::Int(1)), MutationKind::Insert);
        notifier.notify(event.clone());

        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[test]
    fn test_notify_without_subscribers() {
        BroadcastNotifier::default().notify(ChangeEvent::cleared("customers"));
    }
}
