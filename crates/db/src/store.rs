//! Postgres implementation of the engine's store contract.

use agora_core::timers::Slot;
use agora_core::types::{DbId, Timestamp};
use agora_timers::{EntityRef, NewTimer, StoreError, TimerRecord, TimerStore};
use async_trait::async_trait;
use uuid::Uuid;

use crate::repositories::timer_repo::{TimerRepo, UpsertTimer};
use crate::DbPool;

/// [`TimerStore`] backed by the `timers` table.
///
/// Single-winner claims come from the store's row locking
/// (`FOR UPDATE SKIP LOCKED`), so any number of worker processes can run
/// sweeps against the same database.
pub struct PgTimerStore {
    pool: DbPool,
}

impl PgTimerStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn into_records(rows: Vec<crate::models::timer::TimerRow>) -> Result<Vec<TimerRecord>, StoreError> {
    rows.into_iter().map(|row| row.into_record()).collect()
}

#[async_trait]
impl TimerStore for PgTimerStore {
    async fn upsert_slot(&self, timer: NewTimer) -> Result<TimerRecord, StoreError> {
        let input = UpsertTimer {
            entity_kind: timer.entity.kind.id(),
            entity_id: timer.entity.id,
            status_type: timer.status_type,
            execute_at: timer.execute_at,
            based_on_last_post: timer.based_on_last_post,
            duration_minutes: timer.duration_minutes,
            category_id: timer.category_id,
            created_by: timer.created_by,
        };
        TimerRepo::upsert_slot(&self.pool, &input)
            .await
            .map_err(backend)?
            .into_record()
    }

    async fn clear_slot(
        &self,
        entity: EntityRef,
        slot: Slot,
    ) -> Result<Option<TimerRecord>, StoreError> {
        TimerRepo::clear_slot(&self.pool, entity.kind.id(), entity.id, slot)
            .await
            .map_err(backend)?
            .map(|row| row.into_record())
            .transpose()
    }

    async fn find_slot(
        &self,
        entity: EntityRef,
        slot: Slot,
    ) -> Result<Option<TimerRecord>, StoreError> {
        TimerRepo::find_slot(&self.pool, entity.kind.id(), entity.id, slot)
            .await
            .map_err(backend)?
            .map(|row| row.into_record())
            .transpose()
    }

    async fn list_for_entity(&self, entity: EntityRef) -> Result<Vec<TimerRecord>, StoreError> {
        let rows = TimerRepo::list_for_entity(&self.pool, entity.kind.id(), entity.id)
            .await
            .map_err(backend)?;
        into_records(rows)
    }

    async fn claim_due(
        &self,
        now: Timestamp,
        claim_expiry: chrono::Duration,
        claim_token: Uuid,
        limit: i64,
    ) -> Result<Vec<TimerRecord>, StoreError> {
        let claim_cutoff = now - claim_expiry;
        let rows = TimerRepo::claim_due(&self.pool, now, claim_cutoff, claim_token, limit)
            .await
            .map_err(backend)?;
        into_records(rows)
    }

    async fn complete_one_shot(
        &self,
        id: DbId,
        claim_token: Uuid,
        fired_at: Timestamp,
    ) -> Result<bool, StoreError> {
        TimerRepo::complete_one_shot(&self.pool, id, claim_token, fired_at)
            .await
            .map_err(backend)
    }

    async fn complete_repeating(
        &self,
        id: DbId,
        claim_token: Uuid,
        fired_at: Timestamp,
        next_at: Timestamp,
    ) -> Result<bool, StoreError> {
        TimerRepo::complete_repeating(&self.pool, id, claim_token, fired_at, next_at)
            .await
            .map_err(backend)
    }

    async fn fail_retryable(
        &self,
        id: DbId,
        claim_token: Uuid,
        error: &str,
        retry_at: Timestamp,
    ) -> Result<bool, StoreError> {
        TimerRepo::fail_retryable(&self.pool, id, claim_token, error, retry_at)
            .await
            .map_err(backend)
    }

    async fn fail_terminal(
        &self,
        id: DbId,
        claim_token: Uuid,
        error: &str,
    ) -> Result<bool, StoreError> {
        TimerRepo::fail_terminal(&self.pool, id, claim_token, error)
            .await
            .map_err(backend)
    }

    async fn recompute_from_last_post(
        &self,
        entity: EntityRef,
        new_post_at: Timestamp,
    ) -> Result<Vec<TimerRecord>, StoreError> {
        let rows = TimerRepo::recompute_from_last_post(
            &self.pool,
            entity.kind.id(),
            entity.id,
            new_post_at,
        )
        .await
        .map_err(backend)?;
        into_records(rows)
    }
}
