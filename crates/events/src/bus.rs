//! In-process event bus backed by a `tokio::sync::broadcast` channel.

use agora_core::timers::EntityKind;
use agora_core::types::{DbId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// ModerationEvent
// ---------------------------------------------------------------------------

/// An audit event emitted by the timer subsystem.
///
/// Constructed via [`ModerationEvent::new`] and enriched with the builder
/// methods; the subject is the entity a timer acted on, the actor is the
/// staff member who armed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationEvent {
    /// Dot-separated event name, e.g. `"timer.fired"`.
    pub event_type: String,

    /// Kind of the entity the event concerns.
    pub subject_kind: Option<EntityKind>,

    /// Database id of that entity.
    pub subject_id: Option<DbId>,

    /// Staff member responsible, when one exists.
    pub actor_user_id: Option<DbId>,

    /// Event-specific JSON payload.
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: Timestamp,
}

impl ModerationEvent {
    /// Create a new event with only the required `event_type`.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            subject_kind: None,
            subject_id: None,
            actor_user_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Attach the subject entity.
    pub fn with_subject(mut self, kind: EntityKind, id: DbId) -> Self {
        self.subject_kind = Some(kind);
        self.subject_id = Some(id);
        self
    }

    /// Attach the acting user.
    pub fn with_actor(mut self, user_id: DbId) -> Self {
        self.actor_user_id = Some(user_id);
        self
    }

    /// Set the JSON payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out bus, shared via `Arc<EventBus>`.
///
/// Publishing never blocks: when the buffer is full the oldest unconsumed
/// events are dropped and slow receivers observe `RecvError::Lagged`.
pub struct EventBus {
    sender: broadcast::Sender<ModerationEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers. With zero subscribers
    /// the event is dropped; the persistence task (when running) is the
    /// subscriber that guarantees durable capture.
    pub fn publish(&self, event: ModerationEvent) {
        // The only send error means there are no receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<ModerationEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
