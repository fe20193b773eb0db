//! The `timers` table row and its mapping onto the domain record.

use agora_core::timers::{EntityKind, StatusType, TimerState};
use agora_core::types::{DbId, Timestamp};
use agora_timers::{EntityRef, StoreError, TimerRecord};
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `timers` table, with raw lookup-table ids.
#[derive(Debug, Clone, FromRow)]
pub struct TimerRow {
    pub id: DbId,
    pub entity_kind: i16,
    pub entity_id: DbId,
    pub slot: i16,
    pub status_type_id: i16,
    pub state_id: i16,
    pub execute_at: Option<Timestamp>,
    pub based_on_last_post: bool,
    pub duration_minutes: Option<i32>,
    pub category_id: Option<DbId>,
    pub created_by: DbId,
    pub attempts: i16,
    pub last_error: Option<String>,
    pub claimed_at: Option<Timestamp>,
    pub claim_token: Option<Uuid>,
    pub last_executed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TimerRow {
    /// Map the raw ids onto the closed domain enums.
    ///
    /// Fails with [`StoreError::Corrupt`] when a row carries an id outside
    /// the seeded lookup tables or a slot that disagrees with the status
    /// type's policy — both mean the table was written around the engine.
    pub fn into_record(self) -> Result<TimerRecord, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: self.id,
            reason,
        };

        let kind = EntityKind::from_id(self.entity_kind)
            .ok_or_else(|| corrupt(format!("unknown entity kind {}", self.entity_kind)))?;
        let status_type = StatusType::from_id(self.status_type_id)
            .ok_or_else(|| corrupt(format!("unknown status type {}", self.status_type_id)))?;
        let state = TimerState::from_id(self.state_id)
            .ok_or_else(|| corrupt(format!("unknown timer state {}", self.state_id)))?;
        if status_type.slot().id() != self.slot {
            return Err(corrupt(format!(
                "slot {} does not match status type {status_type}",
                self.slot
            )));
        }

        Ok(TimerRecord {
            id: self.id,
            entity: EntityRef {
                kind,
                id: self.entity_id,
            },
            status_type,
            state,
            execute_at: self.execute_at,
            based_on_last_post: self.based_on_last_post,
            duration_minutes: self.duration_minutes,
            category_id: self.category_id,
            created_by: self.created_by,
            attempts: self.attempts,
            last_error: self.last_error,
            claimed_at: self.claimed_at,
            claim_token: self.claim_token,
            last_executed_at: self.last_executed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
