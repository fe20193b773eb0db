//! Timer record types.

use agora_core::error::ScheduleError;
use agora_core::timers::{EntityKind, Slot, StatusType, TimerState};
use agora_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference to the entity a timer acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: DbId,
}

impl EntityRef {
    pub fn topic(id: DbId) -> Self {
        Self {
            kind: EntityKind::Topic,
            id,
        }
    }

    pub fn user(id: DbId) -> Self {
        Self {
            kind: EntityKind::User,
            id,
        }
    }
}

/// One persisted scheduled transition.
///
/// A record with `execute_at == None` is inert: it is kept as a tombstone
/// for audit and is never selected by the due lookup. Records are mutated
/// in place on reschedule and cancellation — never duplicated per slot,
/// never physically deleted while the entity exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerRecord {
    pub id: DbId,
    pub entity: EntityRef,
    pub status_type: StatusType,
    pub state: TimerState,
    /// Absolute execution time; `None` means no active timer.
    pub execute_at: Option<Timestamp>,
    /// When true, `execute_at` is recomputed from the latest qualifying post.
    pub based_on_last_post: bool,
    /// Original relative offset, kept so recomputation knows the distance.
    pub duration_minutes: Option<i32>,
    /// Target category, set only for publish timers.
    pub category_id: Option<DbId>,
    pub created_by: DbId,
    /// Consecutive failed firing attempts since the last success.
    pub attempts: i16,
    pub last_error: Option<String>,
    /// Claim lease marker; a claim older than the configured expiry is
    /// considered abandoned and the record becomes claimable again.
    pub claimed_at: Option<Timestamp>,
    #[serde(skip)]
    pub claim_token: Option<Uuid>,
    pub last_executed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TimerRecord {
    /// The mutual-exclusion slot this record occupies.
    pub fn slot(&self) -> Slot {
        self.status_type.slot()
    }

    /// Whether the record has a pending execution.
    pub fn is_active(&self) -> bool {
        self.execute_at.is_some()
    }
}

/// Input for a slot upsert. Produced by the scheduling API after
/// validation; `execute_at` is always absolute here.
#[derive(Debug, Clone)]
pub struct NewTimer {
    pub entity: EntityRef,
    pub status_type: StatusType,
    pub execute_at: Timestamp,
    pub based_on_last_post: bool,
    pub duration_minutes: Option<i32>,
    pub category_id: Option<DbId>,
    pub created_by: DbId,
}

/// When a timer should fire: at a fixed instant or a duration from now.
///
/// An explicit clear (neither time nor duration) is not a `TimerSpec`;
/// [`TimerSpec::from_parts`] maps it to `None` and callers route it to
/// `cancel_timer`, which performs the same tombstone update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSpec {
    At(Timestamp),
    In { minutes: i32 },
}

impl TimerSpec {
    /// Build a spec from the optional wire-level pair.
    ///
    /// Exactly one of `time` and `duration_minutes` may be given. Both
    /// present is a validation error; both absent means "clear the timer"
    /// and yields `Ok(None)`.
    pub fn from_parts(
        time: Option<Timestamp>,
        duration_minutes: Option<i32>,
    ) -> Result<Option<Self>, ScheduleError> {
        match (time, duration_minutes) {
            (Some(_), Some(_)) => Err(ScheduleError::InvalidExecutionTime {
                reason: "provide either an absolute time or a duration, not both".to_string(),
            }),
            (Some(at), None) => Ok(Some(TimerSpec::At(at))),
            (None, Some(minutes)) => Ok(Some(TimerSpec::In { minutes })),
            (None, None) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn from_parts_rejects_both() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let err = TimerSpec::from_parts(Some(at), Some(60)).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidExecutionTime { .. }));
    }

    #[test]
    fn from_parts_maps_both_absent_to_clear() {
        assert_eq!(TimerSpec::from_parts(None, None).unwrap(), None);
    }

    #[test]
    fn from_parts_keeps_single_inputs() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            TimerSpec::from_parts(Some(at), None).unwrap(),
            Some(TimerSpec::At(at))
        );
        assert_eq!(
            TimerSpec::from_parts(None, Some(15)).unwrap(),
            Some(TimerSpec::In { minutes: 15 })
        );
    }
}
