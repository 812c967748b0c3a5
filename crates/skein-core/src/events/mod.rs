//! Event Bus -- broadcast transport for `TaskCompleted`/`TaskTerminated`.
//!
//! One-to-many fan-out to every Coordinator subscriber. Two logical topics,
//! matching §6's wire format (`workflow:events:completed` /
//! `workflow:events:terminated`), modeled as two independent broadcast
//! channels rather than one channel with an enum payload -- this keeps the
//! Coordinator's `tokio::select!` symmetric and lets a slow subscriber on
//! one topic lag without affecting the other.

use skein_db::models::{TaskCompletedEvent, TaskTerminatedEvent};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

/// Handle for publishing events. Cheaply cloneable.
#[derive(Clone)]
pub struct EventBus {
    completed_tx: broadcast::Sender<TaskCompletedEvent>,
    terminated_tx: broadcast::Sender<TaskTerminatedEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (completed_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (terminated_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            completed_tx,
            terminated_tx,
        }
    }

    /// Publish a `TaskCompleted` event. No-op (not an error) if there are
    /// currently no subscribers -- the bus has no backpressure contract.
    pub fn publish_completed(&self, event: TaskCompletedEvent) {
        let _ = self.completed_tx.send(event);
    }

    /// Publish a `TaskTerminated` event.
    pub fn publish_terminated(&self, event: TaskTerminatedEvent) {
        let _ = self.terminated_tx.send(event);
    }

    /// Subscribe to both topics. Each call creates an independent receiver
    /// pair; a Coordinator replica holds exactly one.
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            completed_rx: self.completed_tx.subscribe(),
            terminated_rx: self.terminated_tx.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One Coordinator's view of the bus: a pair of broadcast receivers.
pub struct EventSubscriber {
    completed_rx: broadcast::Receiver<TaskCompletedEvent>,
    terminated_rx: broadcast::Receiver<TaskTerminatedEvent>,
}

/// The next event observed on either topic.
pub enum BusEvent {
    Completed(TaskCompletedEvent),
    Terminated(TaskTerminatedEvent),
    /// The subscriber lagged and missed `skipped` events on one topic.
    /// The Coordinator is expected to treat this as a recoverable, logged
    /// condition -- a dropped event is tolerated per the store-is-source-
    /// of-truth design, not a fatal error.
    Lagged { skipped: u64 },
}

impl EventSubscriber {
    /// Wait for the next event on either topic.
    pub async fn recv(&mut self) -> BusEvent {
        tokio::select! {
            res = self.completed_rx.recv() => match res {
                Ok(event) => BusEvent::Completed(event),
                Err(broadcast::error::RecvError::Lagged(n)) => BusEvent::Lagged { skipped: n },
                Err(broadcast::error::RecvError::Closed) => std::future::pending().await,
            },
            res = self.terminated_rx.recv() => match res {
                Ok(event) => BusEvent::Terminated(event),
                Err(broadcast::error::RecvError::Lagged(n)) => BusEvent::Lagged { skipped: n },
                Err(broadcast::error::RecvError::Closed) => std::future::pending().await,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn publish_completed_is_received() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        let event = TaskCompletedEvent {
            execution_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            ref_id: "a".to_string(),
        };
        bus.publish_completed(event.clone());

        match sub.recv().await {
            BusEvent::Completed(got) => assert_eq!(got.task_id, event.task_id),
            _ => panic!("expected Completed event"),
        }
    }

    #[tokio::test]
    async fn publish_terminated_is_received() {
        use skein_db::models::TerminationKind;

        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        let event = TaskTerminatedEvent {
            execution_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            ref_id: "b".to_string(),
            kind: TerminationKind::Failed,
            error: Some("boom".to_string()),
        };
        bus.publish_terminated(event.clone());

        match sub.recv().await {
            BusEvent::Terminated(got) => assert_eq!(got.task_id, event.task_id),
            _ => panic!("expected Terminated event"),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_the_event() {
        let bus = EventBus::new();
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = TaskCompletedEvent {
            execution_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            ref_id: "a".to_string(),
        };
        bus.publish_completed(event.clone());

        for sub in [&mut sub1, &mut sub2] {
            match sub.recv().await {
                BusEvent::Completed(got) => assert_eq!(got.task_id, event.task_id),
                _ => panic!("expected Completed event"),
            }
        }
    }
}
