//! Transition event types
//!
//! Provides the event definitions emitted by the schedulers and the EventBus
//! that carries them to observers (countdown displays, the simulator).

use crate::ids::{QueueId, TrackId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Transition lifecycle events
///
/// Events are broadcast via EventBus and can be serialized for display
/// collaborators. Every peer emits its own events; nothing here is shared
/// document state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransitionEvent {
    /// A silent gap track was created and started
    GapStarted {
        queue_id: QueueId,
        track_id: TrackId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A silent gap ran for its full duration
    GapExpired { queue_id: QueueId, track_id: Option<TrackId> },

    /// A silent gap was cancelled by a stop
    GapCancelled { queue_id: QueueId, track_id: Option<TrackId> },

    /// A crossfade timer was armed
    CrossfadeArmed {
        queue_id: QueueId,
        track_id: TrackId,
        fire_in_ms: u64,
    },

    /// A crossfade timer fired while the queue was still playing
    CrossfadeFired { queue_id: QueueId },

    /// A fade-in ramp started or resumed
    FadeInStarted { track_id: TrackId, duration_ms: u64 },

    /// The coordinator advanced the queue after a gap
    QueueAdvanced { queue_id: QueueId, track_id: TrackId },

    /// The coordinator stopped the queue because no track followed the gap
    QueueStopped { queue_id: QueueId },
}

/// Broadcast channel for TransitionEvents
pub struct EventBus {
    tx: broadcast::Sender<TransitionEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: TransitionEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
