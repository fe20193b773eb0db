//! The engine's notification/audit hook, backed by the event bus.

use std::sync::Arc;

use agora_timers::{FireOutcome, TimerNotifier, TimerRecord};
use serde_json::json;

use crate::bus::{EventBus, ModerationEvent};

/// Publishes timer activity onto the [`EventBus`].
///
/// Broadcast sends are synchronous and lossy, so the engine's critical
/// path is never blocked by a slow or absent consumer; durable capture is
/// the persistence task's job.
pub struct BusNotifier {
    bus: Arc<EventBus>,
}

impl BusNotifier {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    fn base_payload(record: &TimerRecord) -> serde_json::Value {
        json!({
            "timer_id": record.id,
            "status_type": record.status_type.as_str(),
            "execute_at": record.execute_at,
            "duration_minutes": record.duration_minutes,
            "based_on_last_post": record.based_on_last_post,
            "category_id": record.category_id,
        })
    }

    fn event_for(record: &TimerRecord, event_type: &str) -> ModerationEvent {
        ModerationEvent::new(event_type)
            .with_subject(record.entity.kind, record.entity.id)
            .with_actor(record.created_by)
            .with_payload(Self::base_payload(record))
    }
}

impl TimerNotifier for BusNotifier {
    fn timer_scheduled(&self, record: &TimerRecord) {
        self.bus.publish(Self::event_for(record, "timer.scheduled"));
    }

    fn timer_cancelled(&self, record: &TimerRecord) {
        self.bus.publish(Self::event_for(record, "timer.cancelled"));
    }

    fn timer_fired(&self, record: &TimerRecord, outcome: &FireOutcome) {
        let (event_type, outcome_payload) = match outcome {
            FireOutcome::Completed => ("timer.fired", json!({"outcome": "completed"})),
            FireOutcome::Rescheduled(next_at) => (
                "timer.fired",
                json!({"outcome": "rescheduled", "next_at": next_at}),
            ),
            FireOutcome::Retrying { attempt, retry_at } => (
                "timer.failed",
                json!({"outcome": "retrying", "attempt": attempt, "retry_at": retry_at}),
            ),
            FireOutcome::Terminal(reason) => (
                "timer.failed",
                json!({"outcome": "terminal", "reason": reason}),
            ),
        };

        let mut payload = Self::base_payload(record);
        if let (Some(base), Some(extra)) = (payload.as_object_mut(), outcome_payload.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        self.bus.publish(Self::event_for(record, event_type).with_payload(payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::timers::{EntityKind, StatusType, TimerState};
    use agora_timers::EntityRef;
    use chrono::{Duration, TimeZone, Utc};

    fn record() -> TimerRecord {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        TimerRecord {
            id: 5,
            entity: EntityRef::topic(42),
            status_type: StatusType::Close,
            state: TimerState::Scheduled,
            execute_at: Some(now + Duration::hours(1)),
            based_on_last_post: false,
            duration_minutes: Some(60),
            category_id: None,
            created_by: 9,
            attempts: 0,
            last_error: None,
            claimed_at: None,
            claim_token: None,
            last_executed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn scheduled_events_carry_the_timer_snapshot() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let notifier = BusNotifier::new(bus);

        notifier.timer_scheduled(&record());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "timer.scheduled");
        assert_eq!(event.subject_kind, Some(EntityKind::Topic));
        assert_eq!(event.subject_id, Some(42));
        assert_eq!(event.actor_user_id, Some(9));
        assert_eq!(event.payload["status_type"], "close");
        assert_eq!(event.payload["duration_minutes"], 60);
    }

    #[tokio::test]
    async fn failures_map_to_the_failed_event_type() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let notifier = BusNotifier::new(bus);

        notifier.timer_fired(&record(), &FireOutcome::Terminal("gone".into()));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "timer.failed");
        assert_eq!(event.payload["outcome"], "terminal");
        assert_eq!(event.payload["reason"], "gone");
    }

    #[tokio::test]
    async fn rearms_map_to_the_fired_event_type() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let notifier = BusNotifier::new(bus);

        let next = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        notifier.timer_fired(&record(), &FireOutcome::Rescheduled(next));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "timer.fired");
        assert_eq!(event.payload["outcome"], "rescheduled");
    }
}
