//! Row-level change notifications.
//!
//! Writers publish `(table, row_ids)` after their transaction commits; the
//! mirror synchronizer is the single consumer draining its receiver. Events
//! carry ids only — consumers re-read current row state by id, so delivery
//! order never matters.

use std::sync::Mutex;
use tokio::sync::mpsc;

/// One committed change to an encrypted table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: String,
    pub row_ids: Vec<String>,
}

impl ChangeEvent {
    pub fn new(table: impl Into<String>, row_ids: Vec<String>) -> Self {
        Self {
            table: table.into(),
            row_ids,
        }
    }
}

/// Fan-out bus for change events.
#[derive(Default)]
pub struct ChangeBus {
    senders: Mutex<Vec<mpsc::UnboundedSender<ChangeEvent>>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber. Events published before this call are
    /// not replayed.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ChangeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx);
        rx
    }

    /// Publishes an event to all live subscribers, pruning closed ones.
    pub fn publish(&self, event: ChangeEvent) {
        let mut senders = self.senders.lock().unwrap();
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let bus = ChangeBus::new();
        let mut rx = bus.subscribe();

        bus.publish(ChangeEvent::new("tasks_enc", vec!["a".to_string()]));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.table, "tasks_enc");
        assert_eq!(event.row_ids, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned() {
        let bus = ChangeBus::new();
        let rx = bus.subscribe();
        drop(rx);

        // Must not error or leak the closed sender
        bus.publish(ChangeEvent::new("tasks_enc", vec![]));
        assert!(bus.senders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_a_copy() {
        let bus = ChangeBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(ChangeEvent::new("t", vec!["x".to_string()]));

        assert_eq!(rx1.recv().await.unwrap().row_ids, vec!["x".to_string()]);
        assert_eq!(rx2.recv().await.unwrap().row_ids, vec!["x".to_string()]);
    }
}
