use crate::timers::{EntityKind, StatusType};

/// Caller-input errors surfaced synchronously by the scheduling API.
///
/// None of these are retried: the request is rejected before anything is
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// The status type name does not match any registered timer kind.
    #[error("unknown status type: {0}")]
    UnknownStatusType(String),

    /// The status type requires a target category and none was given.
    #[error("{status_type} timers require a category id")]
    MissingCategory { status_type: StatusType },

    /// The duration is non-positive or exceeds the maximum.
    #[error("invalid duration {minutes}: {reason}")]
    InvalidDuration { minutes: i32, reason: &'static str },

    /// The execution time cannot be computed or is not in the future.
    #[error("invalid execution time: {reason}")]
    InvalidExecutionTime { reason: String },

    /// The status type does not apply to this kind of entity
    /// (e.g. a topic-close timer on a user account).
    #[error("{status_type} timers cannot target {kind} entities")]
    EntityMismatch {
        status_type: StatusType,
        kind: EntityKind,
    },
}

/// Errors raised while firing a claimed timer.
///
/// These are never returned to a synchronous caller; the sweep records the
/// outcome on the timer itself (state plus `last_error`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FireError {
    /// The subject entity no longer exists. Terminal, timer is cleared.
    #[error("entity no longer exists")]
    EntityGone,

    /// The entity exists but its state no longer admits the transition
    /// (e.g. closing an already-closed topic). Terminal, timer is cleared.
    #[error("entity state incompatible with transition: {0}")]
    IncompatibleEntityState(String),

    /// The side effect failed in a way worth retrying (database hiccup,
    /// timeout). Retried with backoff up to the configured bound.
    #[error("transient failure: {0}")]
    Transient(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_type_names_the_input() {
        let err = ScheduleError::UnknownStatusType("frobnicate".into());
        assert_eq!(err.to_string(), "unknown status type: frobnicate");
    }

    #[test]
    fn missing_category_names_the_status_type() {
        let err = ScheduleError::MissingCategory {
            status_type: StatusType::PublishToCategory,
        };
        assert!(err.to_string().contains("publish_to_category"));
    }

    #[test]
    fn entity_mismatch_names_both_sides() {
        let err = ScheduleError::EntityMismatch {
            status_type: StatusType::Unsuspend,
            kind: EntityKind::Topic,
        };
        assert!(err.to_string().contains("unsuspend"));
        assert!(err.to_string().contains("topic"));
    }

    #[test]
    fn transient_fire_error_carries_reason() {
        let err = FireError::Transient("connection reset".into());
        assert!(err.to_string().contains("connection reset"));
    }
}
