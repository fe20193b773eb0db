//! In-process timer store.
//!
//! Backs the engine's unit tests and single-node embeddings. A single
//! mutex serializes every operation, which gives `claim_due` the same
//! single-winner semantics the SQL store gets from row-level conditional
//! updates.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use agora_core::timers::{Slot, TimerState};
use agora_core::types::{DbId, Timestamp};
use async_trait::async_trait;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::record::{EntityRef, NewTimer, TimerRecord};
use crate::store::{StoreError, TimerStore};

#[derive(Default)]
struct Inner {
    next_id: DbId,
    rows: BTreeMap<DbId, TimerRecord>,
}

/// [`TimerStore`] held entirely in memory.
pub struct MemoryTimerStore {
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl MemoryTimerStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Use an injected clock for `created_at`/`updated_at` stamps.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("timer store mutex poisoned")
    }

    fn find_row_id(inner: &Inner, entity: EntityRef, slot: Slot) -> Option<DbId> {
        inner
            .rows
            .values()
            .find(|r| r.entity == entity && r.slot() == slot)
            .map(|r| r.id)
    }
}

impl Default for MemoryTimerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimerStore for MemoryTimerStore {
    async fn upsert_slot(&self, timer: NewTimer) -> Result<TimerRecord, StoreError> {
        let now = self.clock.now();
        let mut inner = self.lock();

        let slot = timer.status_type.slot();
        if let Some(id) = Self::find_row_id(&inner, timer.entity, slot) {
            let row = inner.rows.get_mut(&id).expect("row indexed but missing");
            row.status_type = timer.status_type;
            row.state = TimerState::Scheduled;
            row.execute_at = Some(timer.execute_at);
            row.based_on_last_post = timer.based_on_last_post;
            row.duration_minutes = timer.duration_minutes;
            row.category_id = timer.category_id;
            row.created_by = timer.created_by;
            row.attempts = 0;
            row.last_error = None;
            row.claimed_at = None;
            row.claim_token = None;
            row.updated_at = now;
            return Ok(row.clone());
        }

        inner.next_id += 1;
        let record = TimerRecord {
            id: inner.next_id,
            entity: timer.entity,
            status_type: timer.status_type,
            state: TimerState::Scheduled,
            execute_at: Some(timer.execute_at),
            based_on_last_post: timer.based_on_last_post,
            duration_minutes: timer.duration_minutes,
            category_id: timer.category_id,
            created_by: timer.created_by,
            attempts: 0,
            last_error: None,
            claimed_at: None,
            claim_token: None,
            last_executed_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.rows.insert(record.id, record.clone());
        Ok(record)
    }

    async fn clear_slot(
        &self,
        entity: EntityRef,
        slot: Slot,
    ) -> Result<Option<TimerRecord>, StoreError> {
        let now = self.clock.now();
        let mut inner = self.lock();

        let Some(id) = Self::find_row_id(&inner, entity, slot) else {
            return Ok(None);
        };
        let row = inner.rows.get_mut(&id).expect("row indexed but missing");
        if row.execute_at.is_none() {
            return Ok(None);
        }
        row.execute_at = None;
        row.duration_minutes = None;
        row.updated_at = now;
        Ok(Some(row.clone()))
    }

    async fn find_slot(
        &self,
        entity: EntityRef,
        slot: Slot,
    ) -> Result<Option<TimerRecord>, StoreError> {
        let inner = self.lock();
        Ok(Self::find_row_id(&inner, entity, slot)
            .and_then(|id| inner.rows.get(&id))
            .cloned())
    }

    async fn list_for_entity(&self, entity: EntityRef) -> Result<Vec<TimerRecord>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .rows
            .values()
            .filter(|r| r.entity == entity)
            .cloned()
            .collect())
    }

    async fn claim_due(
        &self,
        now: Timestamp,
        claim_expiry: chrono::Duration,
        claim_token: Uuid,
        limit: i64,
    ) -> Result<Vec<TimerRecord>, StoreError> {
        let mut inner = self.lock();

        let mut due: Vec<DbId> = inner
            .rows
            .values()
            .filter(|r| {
                let Some(execute_at) = r.execute_at else {
                    return false;
                };
                let claimable = match r.claimed_at {
                    None => true,
                    Some(claimed_at) => claimed_at + claim_expiry <= now,
                };
                execute_at <= now
                    && claimable
                    && matches!(
                        r.state,
                        TimerState::Scheduled
                            | TimerState::FailedRetryable
                            | TimerState::Executing
                    )
            })
            .map(|r| r.id)
            .collect();
        due.sort_by_key(|id| inner.rows[id].execute_at);
        due.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            let row = inner.rows.get_mut(&id).expect("row indexed but missing");
            row.state = TimerState::Executing;
            row.claimed_at = Some(now);
            row.claim_token = Some(claim_token);
            row.updated_at = now;
            claimed.push(row.clone());
        }
        Ok(claimed)
    }

    async fn complete_one_shot(
        &self,
        id: DbId,
        claim_token: Uuid,
        fired_at: Timestamp,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(row) = inner
            .rows
            .get_mut(&id)
            .filter(|r| r.claim_token == Some(claim_token))
        else {
            return Ok(false);
        };
        row.state = TimerState::Completed;
        row.execute_at = None;
        row.last_executed_at = Some(fired_at);
        row.attempts = 0;
        row.last_error = None;
        row.claimed_at = None;
        row.claim_token = None;
        row.updated_at = fired_at;
        Ok(true)
    }

    async fn complete_repeating(
        &self,
        id: DbId,
        claim_token: Uuid,
        fired_at: Timestamp,
        next_at: Timestamp,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(row) = inner
            .rows
            .get_mut(&id)
            .filter(|r| r.claim_token == Some(claim_token))
        else {
            return Ok(false);
        };
        let rearmed = row.execute_at.is_some();
        if rearmed {
            row.state = TimerState::Scheduled;
            row.execute_at = Some(next_at);
        } else {
            // Cancelled while the firing was in flight: stay inert.
            row.state = TimerState::Completed;
        }
        row.last_executed_at = Some(fired_at);
        row.attempts = 0;
        row.last_error = None;
        row.claimed_at = None;
        row.claim_token = None;
        row.updated_at = fired_at;
        Ok(rearmed)
    }

    async fn fail_retryable(
        &self,
        id: DbId,
        claim_token: Uuid,
        error: &str,
        retry_at: Timestamp,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let Some(row) = inner
            .rows
            .get_mut(&id)
            .filter(|r| r.claim_token == Some(claim_token))
        else {
            return Ok(false);
        };
        row.state = TimerState::FailedRetryable;
        row.attempts += 1;
        row.last_error = Some(error.to_string());
        if row.execute_at.is_some() {
            row.execute_at = Some(retry_at);
        }
        row.claimed_at = None;
        row.claim_token = None;
        row.updated_at = now;
        Ok(true)
    }

    async fn fail_terminal(
        &self,
        id: DbId,
        claim_token: Uuid,
        error: &str,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let Some(row) = inner
            .rows
            .get_mut(&id)
            .filter(|r| r.claim_token == Some(claim_token))
        else {
            return Ok(false);
        };
        row.state = TimerState::FailedTerminal;
        row.execute_at = None;
        row.last_error = Some(error.to_string());
        row.claimed_at = None;
        row.claim_token = None;
        row.updated_at = now;
        Ok(true)
    }

    async fn recompute_from_last_post(
        &self,
        entity: EntityRef,
        new_post_at: Timestamp,
    ) -> Result<Vec<TimerRecord>, StoreError> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let mut updated = Vec::new();
        for row in inner.rows.values_mut() {
            if row.entity != entity || !row.based_on_last_post || row.execute_at.is_none() {
                continue;
            }
            let Some(minutes) = row.duration_minutes else {
                continue;
            };
            row.execute_at = Some(new_post_at + chrono::Duration::minutes(i64::from(minutes)));
            row.updated_at = now;
            updated.push(row.clone());
        }
        Ok(updated)
    }
}
