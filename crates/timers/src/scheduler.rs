//! The scheduling API: set, replace, and clear timers on entities.

use std::sync::Arc;

use agora_core::error::ScheduleError;
use agora_core::timers::{validate_duration, StatusType, MAX_DURATION_MINUTES};
use agora_core::types::{DbId, Timestamp};

use crate::clock::Clock;
use crate::notify::TimerNotifier;
use crate::record::{EntityRef, NewTimer, TimerRecord, TimerSpec};
use crate::store::{StoreError, TimerStore};

/// Error from a scheduling call: either the caller's input was invalid or
/// the store failed.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Invalid(#[from] ScheduleError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A request to arm (or re-arm) one timer slot.
#[derive(Debug, Clone)]
pub struct SetTimer {
    pub entity: EntityRef,
    pub status_type: StatusType,
    pub spec: TimerSpec,
    pub based_on_last_post: bool,
    pub category_id: Option<DbId>,
    pub acting_user: DbId,
}

/// Synchronous entry point for callers (admin tooling, moderation flows).
///
/// Validates inputs, computes the absolute execution time, enforces the
/// mutual-exclusion slot rule, and persists the record. Side effects
/// happen only at fire time; the only thing a successful call does beyond
/// persistence is notify the audit hook.
pub struct TimerScheduler {
    store: Arc<dyn TimerStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn TimerNotifier>,
    max_duration_minutes: i32,
}

impl TimerScheduler {
    pub fn new(
        store: Arc<dyn TimerStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn TimerNotifier>,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            max_duration_minutes: MAX_DURATION_MINUTES,
        }
    }

    /// Tighten the duration cap below the 20 year default.
    pub fn with_max_duration_minutes(mut self, minutes: i32) -> Self {
        self.max_duration_minutes = minutes;
        self
    }

    /// Arm the slot of `req.status_type` on the entity, superseding any
    /// timer already in that slot.
    ///
    /// The returned snapshot is authoritative: `execute_at` derived from a
    /// duration, the forced `based_on_last_post` flag for
    /// close-after-last-post timers, and the dropped category on
    /// non-publish types all come back normalized here.
    pub async fn set_timer(&self, req: SetTimer) -> Result<TimerRecord, SchedulerError> {
        let policy = req.status_type.policy();

        if policy.entity_kind != req.entity.kind {
            return Err(ScheduleError::EntityMismatch {
                status_type: req.status_type,
                kind: req.entity.kind,
            }
            .into());
        }
        if policy.requires_category && req.category_id.is_none() {
            return Err(ScheduleError::MissingCategory {
                status_type: req.status_type,
            }
            .into());
        }

        let based_on_last_post =
            req.based_on_last_post || req.status_type == StatusType::CloseAfterLastPost;
        let now = self.clock.now();

        let (execute_at, duration_minutes) = match req.spec {
            TimerSpec::In { minutes } => {
                validate_duration(minutes, self.max_duration_minutes)?;
                (now + chrono::Duration::minutes(i64::from(minutes)), Some(minutes))
            }
            TimerSpec::At(at) => {
                if based_on_last_post {
                    return Err(ScheduleError::InvalidExecutionTime {
                        reason: format!(
                            "{} timers take a duration measured from the last post",
                            req.status_type
                        ),
                    }
                    .into());
                }
                if policy.repeating {
                    return Err(ScheduleError::InvalidExecutionTime {
                        reason: format!(
                            "{} timers repeat and take a duration, not a fixed time",
                            req.status_type
                        ),
                    }
                    .into());
                }
                if at <= now {
                    return Err(ScheduleError::InvalidExecutionTime {
                        reason: "execution time must be in the future".to_string(),
                    }
                    .into());
                }
                (at, None)
            }
        };

        if based_on_last_post && !policy.accepts_based_on_last_post {
            return Err(ScheduleError::InvalidExecutionTime {
                reason: format!("{} timers cannot be based on the last post", req.status_type),
            }
            .into());
        }

        let record = self
            .store
            .upsert_slot(NewTimer {
                entity: req.entity,
                status_type: req.status_type,
                execute_at,
                based_on_last_post,
                duration_minutes,
                category_id: if policy.requires_category {
                    req.category_id
                } else {
                    None
                },
                created_by: req.acting_user,
            })
            .await?;

        tracing::info!(
            timer_id = record.id,
            entity_kind = %req.entity.kind,
            entity_id = req.entity.id,
            status_type = %record.status_type,
            execute_at = %execute_at,
            "Timer scheduled",
        );
        self.notifier.timer_scheduled(&record);
        Ok(record)
    }

    /// Deactivate the slot of `status_type` on the entity.
    ///
    /// Sets `execute_at` (and the stored duration) to `NULL` on the
    /// existing record; the row is kept for audit. A no-op — not an
    /// error — when no active timer exists. Safe to call while a sweep
    /// holds a claim on the record: the in-flight firing completes, but no
    /// subsequent fire happens.
    pub async fn cancel_timer(
        &self,
        entity: EntityRef,
        status_type: StatusType,
    ) -> Result<Option<TimerRecord>, SchedulerError> {
        let cleared = self.store.clear_slot(entity, status_type.slot()).await?;
        if let Some(record) = &cleared {
            tracing::info!(
                timer_id = record.id,
                entity_kind = %entity.kind,
                entity_id = entity.id,
                status_type = %record.status_type,
                "Timer cancelled",
            );
            self.notifier.timer_cancelled(record);
        }
        Ok(cleared)
    }

    /// Re-anchor every active `based_on_last_post` timer of the entity to
    /// `new_post_at + original offset`.
    ///
    /// Called by the content pipeline whenever a qualifying post arrives.
    /// Idempotent: repeated calls with the same timestamp land on the same
    /// `execute_at`. Timers with a fixed execution time are untouched.
    pub async fn recompute_from_last_post(
        &self,
        entity: EntityRef,
        new_post_at: Timestamp,
    ) -> Result<Vec<TimerRecord>, SchedulerError> {
        let updated = self
            .store
            .recompute_from_last_post(entity, new_post_at)
            .await?;
        if !updated.is_empty() {
            tracing::debug!(
                entity_kind = %entity.kind,
                entity_id = entity.id,
                count = updated.len(),
                "Recomputed activity-based timers",
            );
        }
        Ok(updated)
    }
}
