//! EventBus service (spec §4.1): a typed, ordered event stream consumed
//! by UIs, the memory writer, and tests. Grounded on the teacher's
//! `services::event_bus::EventBus`, trimmed to the kernel's closed event
//! taxonomy and backed by a `tokio::sync::broadcast` channel rather than
//! the teacher's SQLite-backed multi-process bus, since the kernel spec
//! does not require cross-process fan-out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::domain::models::{EventPayload, SequenceNumber, UnifiedEvent};

/// Channel capacity for the broadcast channel. Lagging subscribers drop
/// the oldest events rather than block the emitter (spec §4.1:
/// "emissions are synchronous from the emitter's perspective" only up to
/// buffering, never up to every subscriber draining).
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

pub type EventSubscriber = broadcast::Receiver<UnifiedEvent>;

/// Per-goal event order is preserved end-to-end (spec §5); ordering
/// across goals is not promised, so a single process-wide monotonic
/// sequence counter is sufficient — consumers that care about per-goal
/// order filter by `goal_id` and rely on the sequence already being
/// assigned in emission order.
pub struct EventBus {
    sender: broadcast::Sender<UnifiedEvent>,
    sequence: AtomicU64,
    /// Last event recorded per goal, used to assert the "no event
    /// follows a terminal event for the same goal" invariant (spec §8)
    /// in debug builds and in tests.
    terminal_goals: Arc<RwLock<std::collections::HashSet<String>>>,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            sequence: AtomicU64::new(0),
            terminal_goals: Arc::new(RwLock::new(std::collections::HashSet::new())),
        }
    }

    pub fn subscribe(&self) -> EventSubscriber {
        self.sender.subscribe()
    }

    /// Publish an event, assigning it the next sequence number. Returns
    /// only after the event is buffered on the broadcast channel;
    /// delivery to subscribers happens asynchronously on their own poll.
    pub async fn publish(&self, goal_id: Option<&str>, payload: EventPayload) -> UnifiedEvent {
        let sequence = SequenceNumber(self.sequence.fetch_add(1, Ordering::SeqCst));
        let event = UnifiedEvent::new(sequence, payload);

        if let Some(goal_id) = goal_id {
            if is_terminal(&event.payload) {
                self.terminal_goals.write().await.insert(goal_id.to_string());
            }
        }

        // A publish with no subscribers is not an error: the bus fans out
        // to whoever happens to be listening, matching spec §4.1's "the
        // bus MAY forward asynchronously" contract.
        let _ = self.sender.send(event.clone());
        event
    }

    /// Whether a terminal event (`backlog_goal_completed` /
    /// `backlog_goal_failed`) has already been observed for this goal.
    /// Used by `ExecutionManager` to assert it never emits twice.
    pub async fn has_terminal_event(&self, goal_id: &str) -> bool {
        self.terminal_goals.read().await.contains(goal_id)
    }
}

fn is_terminal(payload: &EventPayload) -> bool {
    matches!(payload, EventPayload::GoalCompleted { .. } | EventPayload::GoalFailed { .. })
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_assigns_increasing_sequence_numbers() {
        let bus = EventBus::default();
        let a = bus.publish(Some("g-1"), EventPayload::GoalAdded { goal_id: "g-1".into() }).await;
        let b = bus
            .publish(Some("g-1"), EventPayload::GoalClaimed { goal_id: "g-1".into(), claimed_by: -1 })
            .await;
        assert!(b.sequence.0 > a.sequence.0);
    }

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(Some("g-1"), EventPayload::GoalAdded { goal_id: "g-1".into() }).await;
        bus.publish(
            Some("g-1"),
            EventPayload::GoalCompleted { goal_id: "g-1".into(), success: true, partial: false },
        )
        .await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first.payload, EventPayload::GoalAdded { .. }));
        assert!(matches!(second.payload, EventPayload::GoalCompleted { .. }));
    }

    #[tokio::test]
    async fn terminal_event_is_tracked_per_goal() {
        let bus = EventBus::default();
        assert!(!bus.has_terminal_event("g-1").await);
        bus.publish(
            Some("g-1"),
            EventPayload::GoalFailed { goal_id: "g-1".into(), reason: "cancelled".into() },
        )
        .await;
        assert!(bus.has_terminal_event("g-1").await);
    }
}
