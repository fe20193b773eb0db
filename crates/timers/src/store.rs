//! Persistence contract for timer records.

use agora_core::timers::Slot;
use agora_core::types::{DbId, Timestamp};
use async_trait::async_trait;
use uuid::Uuid;

use crate::record::{EntityRef, NewTimer, TimerRecord};

/// Error from a timer store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store failed (connection loss, query error).
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A persisted row no longer maps onto the domain enums.
    #[error("corrupt timer record {id}: {reason}")]
    Corrupt { id: DbId, reason: String },
}

/// Persistence operations the engine needs from a store.
///
/// All mutation of timer records goes through this trait — callers through
/// [`TimerScheduler`](crate::scheduler::TimerScheduler), the sweep through
/// [`TimerSweeper`](crate::sweep::TimerSweeper). Implementations must make
/// `claim_due` a single-winner operation (conditional update semantics):
/// two workers racing on the same due record must not both receive it.
///
/// The settle operations (`complete_*`, `fail_*`) are conditional on the
/// claim token still matching; `Ok(false)` means the claim was lost to a
/// concurrent reschedule, cancellation, or expiry — the caller skips, it is
/// not an error.
#[async_trait]
pub trait TimerStore: Send + Sync {
    /// Insert or overwrite the record for the slot of `timer.status_type`.
    ///
    /// At most one record exists per (entity, slot); rescheduling updates
    /// the existing row in place, resets the failure counters, and releases
    /// any claim so a stale in-flight settle cannot clobber the new
    /// schedule.
    async fn upsert_slot(&self, timer: NewTimer) -> Result<TimerRecord, StoreError>;

    /// Deactivate the slot's record if it is active: `execute_at` and
    /// `duration_minutes` become `NULL`, the row is kept for audit.
    /// Returns `None` when there was nothing active to clear.
    async fn clear_slot(
        &self,
        entity: EntityRef,
        slot: Slot,
    ) -> Result<Option<TimerRecord>, StoreError>;

    /// The slot's record, active or inert.
    async fn find_slot(
        &self,
        entity: EntityRef,
        slot: Slot,
    ) -> Result<Option<TimerRecord>, StoreError>;

    /// All records for an entity, active or inert.
    async fn list_for_entity(&self, entity: EntityRef) -> Result<Vec<TimerRecord>, StoreError>;

    /// Atomically claim up to `limit` due records for this sweep pass.
    ///
    /// A record is due when `execute_at <= now`, it is in `Scheduled` or
    /// `FailedRetryable` state (or `Executing` under an expired claim —
    /// recovery from a crashed worker), and any existing claim is older
    /// than `claim_expiry`. Claimed records move to `Executing` and carry
    /// `claim_token` so settle operations can verify ownership.
    async fn claim_due(
        &self,
        now: Timestamp,
        claim_expiry: chrono::Duration,
        claim_token: Uuid,
        limit: i64,
    ) -> Result<Vec<TimerRecord>, StoreError>;

    /// Retire a fired one-shot record: `Completed`, `execute_at = NULL`,
    /// `last_executed_at` set.
    async fn complete_one_shot(
        &self,
        id: DbId,
        claim_token: Uuid,
        fired_at: Timestamp,
    ) -> Result<bool, StoreError>;

    /// Re-arm a fired repeating record at `next_at`.
    ///
    /// When the record was cancelled while the firing was in flight
    /// (`execute_at` already `NULL`), the record stays inert and this
    /// returns `Ok(false)` — cancellation wins over re-arming.
    async fn complete_repeating(
        &self,
        id: DbId,
        claim_token: Uuid,
        fired_at: Timestamp,
        next_at: Timestamp,
    ) -> Result<bool, StoreError>;

    /// Record a retryable failure: increments `attempts`, stores the
    /// reason, moves `execute_at` to `retry_at` (unless cancelled
    /// mid-flight), releases the claim.
    async fn fail_retryable(
        &self,
        id: DbId,
        claim_token: Uuid,
        error: &str,
        retry_at: Timestamp,
    ) -> Result<bool, StoreError>;

    /// Record a terminal failure: the timer is cleared and will not fire
    /// again until a caller re-arms the slot.
    async fn fail_terminal(
        &self,
        id: DbId,
        claim_token: Uuid,
        error: &str,
    ) -> Result<bool, StoreError>;

    /// Shift every active `based_on_last_post` record of the entity to
    /// `new_post_at + duration`. Idempotent: repeating the call with the
    /// same timestamp leaves the records unchanged. Returns the updated
    /// records.
    async fn recompute_from_last_post(
        &self,
        entity: EntityRef,
        new_post_at: Timestamp,
    ) -> Result<Vec<TimerRecord>, StoreError>;
}
