//! Repository for the `timers` table.
//!
//! The claim and settle statements are the concurrency-critical pieces:
//! `claim_due` takes rows with `FOR UPDATE SKIP LOCKED` so concurrent
//! sweep workers never double-claim, and every settle statement is
//! conditional on the claim token so a lost or expired claim cannot
//! overwrite a row that was re-claimed, rescheduled, or cancelled since.

use agora_core::timers::{Slot, StatusType, TimerState};
use agora_core::types::{DbId, Timestamp};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::timer::TimerRow;

/// Column list for `timers` queries.
const COLUMNS: &str = "\
    id, entity_kind, entity_id, slot, status_type_id, state_id, \
    execute_at, based_on_last_post, duration_minutes, category_id, \
    created_by, attempts, last_error, claimed_at, claim_token, \
    last_executed_at, created_at, updated_at";

/// Input for [`TimerRepo::upsert_slot`].
#[derive(Debug, Clone)]
pub struct UpsertTimer {
    pub entity_kind: i16,
    pub entity_id: DbId,
    pub status_type: StatusType,
    pub execute_at: Timestamp,
    pub based_on_last_post: bool,
    pub duration_minutes: Option<i32>,
    pub category_id: Option<DbId>,
    pub created_by: DbId,
}

/// Provides CRUD and claim operations for timer records.
pub struct TimerRepo;

impl TimerRepo {
    /// Insert the slot's record or overwrite it in place.
    ///
    /// Rescheduling resets the failure counters and releases any claim, so
    /// an in-flight firing of the superseded schedule cannot settle over
    /// the new one.
    pub async fn upsert_slot(
        pool: &PgPool,
        input: &UpsertTimer,
    ) -> Result<TimerRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO timers \
                 (entity_kind, entity_id, slot, status_type_id, state_id, execute_at, \
                  based_on_last_post, duration_minutes, category_id, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT ON CONSTRAINT uq_timers_entity_slot DO UPDATE SET \
                 status_type_id = EXCLUDED.status_type_id, \
                 state_id = EXCLUDED.state_id, \
                 execute_at = EXCLUDED.execute_at, \
                 based_on_last_post = EXCLUDED.based_on_last_post, \
                 duration_minutes = EXCLUDED.duration_minutes, \
                 category_id = EXCLUDED.category_id, \
                 created_by = EXCLUDED.created_by, \
                 attempts = 0, \
                 last_error = NULL, \
                 claimed_at = NULL, \
                 claim_token = NULL, \
                 updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TimerRow>(&query)
            .bind(input.entity_kind)
            .bind(input.entity_id)
            .bind(input.status_type.slot().id())
            .bind(input.status_type.id())
            .bind(TimerState::Scheduled.id())
            .bind(input.execute_at)
            .bind(input.based_on_last_post)
            .bind(input.duration_minutes)
            .bind(input.category_id)
            .bind(input.created_by)
            .fetch_one(pool)
            .await
    }

    /// Null out `execute_at` and the stored duration for the slot's record
    /// if it is active, keeping the row as an audit tombstone. Claim fields
    /// are left untouched: a firing already in flight completes, and the
    /// conditional settle statements make sure it cannot re-arm the row.
    pub async fn clear_slot(
        pool: &PgPool,
        entity_kind: i16,
        entity_id: DbId,
        slot: Slot,
    ) -> Result<Option<TimerRow>, sqlx::Error> {
        let query = format!(
            "UPDATE timers \
             SET execute_at = NULL, duration_minutes = NULL, updated_at = NOW() \
             WHERE entity_kind = $1 AND entity_id = $2 AND slot = $3 \
               AND execute_at IS NOT NULL \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TimerRow>(&query)
            .bind(entity_kind)
            .bind(entity_id)
            .bind(slot.id())
            .fetch_optional(pool)
            .await
    }

    /// The slot's record, active or inert.
    pub async fn find_slot(
        pool: &PgPool,
        entity_kind: i16,
        entity_id: DbId,
        slot: Slot,
    ) -> Result<Option<TimerRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM timers \
             WHERE entity_kind = $1 AND entity_id = $2 AND slot = $3"
        );
        sqlx::query_as::<_, TimerRow>(&query)
            .bind(entity_kind)
            .bind(entity_id)
            .bind(slot.id())
            .fetch_optional(pool)
            .await
    }

    /// Every record for an entity, active or inert.
    pub async fn list_for_entity(
        pool: &PgPool,
        entity_kind: i16,
        entity_id: DbId,
    ) -> Result<Vec<TimerRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM timers \
             WHERE entity_kind = $1 AND entity_id = $2 \
             ORDER BY slot"
        );
        sqlx::query_as::<_, TimerRow>(&query)
            .bind(entity_kind)
            .bind(entity_id)
            .fetch_all(pool)
            .await
    }

    /// Atomically claim up to `limit` due records.
    ///
    /// Eligible rows are active, due, in a claimable state, and not under
    /// a live lease (`claimed_at` null or older than `claim_cutoff`).
    /// `Executing` rows with an expired lease are crash recovery.
    pub async fn claim_due(
        pool: &PgPool,
        now: Timestamp,
        claim_cutoff: Timestamp,
        claim_token: Uuid,
        limit: i64,
    ) -> Result<Vec<TimerRow>, sqlx::Error> {
        let query = format!(
            "UPDATE timers \
             SET claimed_at = $1, claim_token = $2, state_id = $3, updated_at = NOW() \
             WHERE id IN ( \
                 SELECT id FROM timers \
                 WHERE execute_at IS NOT NULL \
                   AND execute_at <= $1 \
                   AND state_id IN ($3, $4, $5) \
                   AND (claimed_at IS NULL OR claimed_at < $6) \
                 ORDER BY execute_at ASC \
                 LIMIT $7 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TimerRow>(&query)
            .bind(now)
            .bind(claim_token)
            .bind(TimerState::Executing.id())
            .bind(TimerState::Scheduled.id())
            .bind(TimerState::FailedRetryable.id())
            .bind(claim_cutoff)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Retire a fired one-shot record. Conditional on the claim token.
    pub async fn complete_one_shot(
        pool: &PgPool,
        id: DbId,
        claim_token: Uuid,
        fired_at: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE timers \
             SET state_id = $3, execute_at = NULL, last_executed_at = $4, \
                 attempts = 0, last_error = NULL, \
                 claimed_at = NULL, claim_token = NULL, updated_at = NOW() \
             WHERE id = $1 AND claim_token = $2",
        )
        .bind(id)
        .bind(claim_token)
        .bind(TimerState::Completed.id())
        .bind(fired_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Re-arm a fired repeating record at `next_at`.
    ///
    /// A record cancelled while the firing was in flight has a null
    /// `execute_at`; cancellation wins, the row stays inert and this
    /// returns `false`.
    pub async fn complete_repeating(
        pool: &PgPool,
        id: DbId,
        claim_token: Uuid,
        fired_at: Timestamp,
        next_at: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let rearmed: Option<bool> = sqlx::query_scalar(
            "UPDATE timers \
             SET state_id = CASE WHEN execute_at IS NULL THEN $3 ELSE $4 END, \
                 execute_at = CASE WHEN execute_at IS NULL THEN NULL ELSE $5 END, \
                 last_executed_at = $6, \
                 attempts = 0, last_error = NULL, \
                 claimed_at = NULL, claim_token = NULL, updated_at = NOW() \
             WHERE id = $1 AND claim_token = $2 \
             RETURNING (execute_at IS NOT NULL)",
        )
        .bind(id)
        .bind(claim_token)
        .bind(TimerState::Completed.id())
        .bind(TimerState::Scheduled.id())
        .bind(next_at)
        .bind(fired_at)
        .fetch_optional(pool)
        .await?;
        Ok(rearmed.unwrap_or(false))
    }

    /// Record a retryable failure and push `execute_at` to the backoff
    /// time — unless the record was cancelled mid-flight, in which case it
    /// stays inert.
    pub async fn fail_retryable(
        pool: &PgPool,
        id: DbId,
        claim_token: Uuid,
        error: &str,
        retry_at: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE timers \
             SET state_id = $3, attempts = attempts + 1, last_error = $4, \
                 execute_at = CASE WHEN execute_at IS NULL THEN NULL ELSE $5 END, \
                 claimed_at = NULL, claim_token = NULL, updated_at = NOW() \
             WHERE id = $1 AND claim_token = $2",
        )
        .bind(id)
        .bind(claim_token)
        .bind(TimerState::FailedRetryable.id())
        .bind(error)
        .bind(retry_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a terminal failure and clear the timer.
    pub async fn fail_terminal(
        pool: &PgPool,
        id: DbId,
        claim_token: Uuid,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE timers \
             SET state_id = $3, execute_at = NULL, last_error = $4, \
                 claimed_at = NULL, claim_token = NULL, updated_at = NOW() \
             WHERE id = $1 AND claim_token = $2",
        )
        .bind(id)
        .bind(claim_token)
        .bind(TimerState::FailedTerminal.id())
        .bind(error)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Shift every active `based_on_last_post` record of the entity to
    /// `new_post_at + stored duration`.
    pub async fn recompute_from_last_post(
        pool: &PgPool,
        entity_kind: i16,
        entity_id: DbId,
        new_post_at: Timestamp,
    ) -> Result<Vec<TimerRow>, sqlx::Error> {
        let query = format!(
            "UPDATE timers \
             SET execute_at = $3 + make_interval(mins => duration_minutes), \
                 updated_at = NOW() \
             WHERE entity_kind = $1 AND entity_id = $2 \
               AND based_on_last_post = TRUE \
               AND execute_at IS NOT NULL \
               AND duration_minutes IS NOT NULL \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TimerRow>(&query)
            .bind(entity_kind)
            .bind(entity_id)
            .bind(new_post_at)
            .fetch_all(pool)
            .await
    }
}
