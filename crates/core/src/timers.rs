//! Timer status types, mutual-exclusion slots, and the transition policy
//! registry.
//!
//! Each enum's discriminant matches the seed data order (1-based) in the
//! corresponding lookup table (`timer_entity_kinds`, `timer_status_types`,
//! `timer_states`). The policy table is a total function over the closed
//! [`StatusType`] enum, so it is immutable after compile time and safe for
//! lock-free concurrent reads; adding a status type means adding one enum
//! variant and one policy row, not a branch scattered across callers.

use std::fmt;
use std::str::FromStr;

use crate::error::ScheduleError;

/// Lookup-table ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_id_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database lookup-table ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Reverse lookup from a database ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_id_enum! {
    /// The kind of entity a timer acts on.
    EntityKind {
        Topic = 1,
        User = 2,
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Topic => "topic",
            EntityKind::User => "user",
        })
    }
}

define_id_enum! {
    /// The kind of deferred transition a timer performs when it fires.
    StatusType {
        /// Close the topic at a fixed time.
        Close = 1,
        /// Close the topic a duration after the most recent post.
        CloseAfterLastPost = 2,
        /// Reopen a closed topic.
        Open = 3,
        /// Move the topic into a category and make it visible.
        PublishToCategory = 4,
        /// Soft-delete the topic.
        Delete = 5,
        /// Bump the topic, repeatedly.
        Bump = 6,
        /// Soft-delete every reply, keeping the first post.
        DeleteReplies = 7,
        /// Lift an expired user suspension.
        Unsuspend = 8,
        /// Lift an expired user silence.
        Unsilence = 9,
    }
}

define_id_enum! {
    /// Mutual-exclusion grouping: at most one active timer per slot per
    /// entity. `Close` and `CloseAfterLastPost` share the `Closing` slot.
    Slot {
        Closing = 1,
        Opening = 2,
        Publishing = 3,
        Deleting = 4,
        Bumping = 5,
        DeletingReplies = 6,
        Unsuspending = 7,
        Unsilencing = 8,
    }
}

define_id_enum! {
    /// Per-record execution state.
    TimerState {
        Scheduled = 1,
        Executing = 2,
        Completed = 3,
        FailedRetryable = 4,
        FailedTerminal = 5,
    }
}

// ---------------------------------------------------------------------------
// StatusType string form
// ---------------------------------------------------------------------------

impl StatusType {
    /// Wire/storage name of the status type.
    pub fn as_str(self) -> &'static str {
        match self {
            StatusType::Close => "close",
            StatusType::CloseAfterLastPost => "close_after_last_post",
            StatusType::Open => "open",
            StatusType::PublishToCategory => "publish_to_category",
            StatusType::Delete => "delete",
            StatusType::Bump => "bump",
            StatusType::DeleteReplies => "delete_replies",
            StatusType::Unsuspend => "unsuspend",
            StatusType::Unsilence => "unsilence",
        }
    }
}

impl fmt::Display for StatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusType {
    type Err = ScheduleError;

    /// Parse a status type name. This is the only place
    /// [`ScheduleError::UnknownStatusType`] can arise: past this boundary
    /// the enum is closed and the policy table is total.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "close" => Ok(StatusType::Close),
            "close_after_last_post" => Ok(StatusType::CloseAfterLastPost),
            "open" => Ok(StatusType::Open),
            "publish_to_category" => Ok(StatusType::PublishToCategory),
            "delete" => Ok(StatusType::Delete),
            "bump" => Ok(StatusType::Bump),
            "delete_replies" => Ok(StatusType::DeleteReplies),
            "unsuspend" => Ok(StatusType::Unsuspend),
            "unsilence" => Ok(StatusType::Unsilence),
            other => Err(ScheduleError::UnknownStatusType(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Policy registry
// ---------------------------------------------------------------------------

/// The rule set governing one status type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerPolicy {
    /// Mutual-exclusion slot this status type occupies.
    pub slot: Slot,
    /// The only entity kind this status type may target.
    pub entity_kind: EntityKind,
    /// Whether the execution time is recomputed from the latest post.
    pub accepts_based_on_last_post: bool,
    /// Whether a target category id must be provided.
    pub requires_category: bool,
    /// Whether firing reschedules the timer instead of retiring it.
    pub repeating: bool,
}

impl StatusType {
    /// Policy lookup. Total over the enum — no default row exists.
    pub const fn policy(self) -> TimerPolicy {
        match self {
            StatusType::Close => TimerPolicy {
                slot: Slot::Closing,
                entity_kind: EntityKind::Topic,
                accepts_based_on_last_post: false,
                requires_category: false,
                repeating: false,
            },
            StatusType::CloseAfterLastPost => TimerPolicy {
                slot: Slot::Closing,
                entity_kind: EntityKind::Topic,
                accepts_based_on_last_post: true,
                requires_category: false,
                repeating: false,
            },
            StatusType::Open => TimerPolicy {
                slot: Slot::Opening,
                entity_kind: EntityKind::Topic,
                accepts_based_on_last_post: false,
                requires_category: false,
                repeating: false,
            },
            StatusType::PublishToCategory => TimerPolicy {
                slot: Slot::Publishing,
                entity_kind: EntityKind::Topic,
                accepts_based_on_last_post: false,
                requires_category: true,
                repeating: false,
            },
            StatusType::Delete => TimerPolicy {
                slot: Slot::Deleting,
                entity_kind: EntityKind::Topic,
                accepts_based_on_last_post: false,
                requires_category: false,
                repeating: false,
            },
            StatusType::Bump => TimerPolicy {
                slot: Slot::Bumping,
                entity_kind: EntityKind::Topic,
                accepts_based_on_last_post: false,
                requires_category: false,
                repeating: true,
            },
            StatusType::DeleteReplies => TimerPolicy {
                slot: Slot::DeletingReplies,
                entity_kind: EntityKind::Topic,
                accepts_based_on_last_post: false,
                requires_category: false,
                repeating: false,
            },
            StatusType::Unsuspend => TimerPolicy {
                slot: Slot::Unsuspending,
                entity_kind: EntityKind::User,
                accepts_based_on_last_post: false,
                requires_category: false,
                repeating: false,
            },
            StatusType::Unsilence => TimerPolicy {
                slot: Slot::Unsilencing,
                entity_kind: EntityKind::User,
                accepts_based_on_last_post: false,
                requires_category: false,
                repeating: false,
            },
        }
    }

    /// The mutual-exclusion slot this status type occupies.
    pub const fn slot(self) -> Slot {
        self.policy().slot
    }
}

// ---------------------------------------------------------------------------
// Duration bounds
// ---------------------------------------------------------------------------

/// Default upper bound on timer durations: 20 years expressed in minutes.
pub const MAX_DURATION_MINUTES: i32 = 20 * 365 * 1440;

/// Validate a relative duration before it is persisted. `max_minutes` is
/// operator-configurable and defaults to [`MAX_DURATION_MINUTES`].
pub fn validate_duration(minutes: i32, max_minutes: i32) -> Result<(), ScheduleError> {
    if minutes <= 0 {
        return Err(ScheduleError::InvalidDuration {
            minutes,
            reason: "must be a positive number of minutes",
        });
    }
    if minutes > max_minutes {
        return Err(ScheduleError::InvalidDuration {
            minutes,
            reason: "exceeds the maximum allowed duration",
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Valid per-record state transitions.
///
/// `Executing -> Scheduled` is the repeating-completion edge (bump timers
/// re-arm themselves); `Completed -> Scheduled` and
/// `FailedTerminal -> Scheduled` happen when a caller re-arms the slot via
/// the scheduling API.
pub mod state_machine {
    use super::TimerState;

    /// Returns the set of states reachable from `from`.
    pub fn valid_transitions(from: TimerState) -> &'static [TimerState] {
        use TimerState::*;
        match from {
            Scheduled => &[Executing],
            Executing => &[Completed, Scheduled, FailedRetryable, FailedTerminal],
            FailedRetryable => &[Executing],
            Completed => &[Scheduled],
            FailedTerminal => &[Scheduled],
        }
    }

    /// Check whether a transition from `from` to `to` is valid.
    pub fn can_transition(from: TimerState, to: TimerState) -> bool {
        valid_transitions(from).contains(&to)
    }
}
