//! Entity accessor contract.

use agora_core::error::FireError;
use agora_core::timers::StatusType;
use async_trait::async_trait;

use crate::record::{EntityRef, TimerRecord};

/// Access to the entities timers act on. Implemented over the real data
/// model in `agora-db`; tests inject counting stubs.
///
/// The engine calls `check` after claiming a due record, immediately
/// before firing: an entity that disappeared or drifted into a state the
/// transition no longer applies to must fail here with
/// [`FireError::EntityGone`] / [`FireError::IncompatibleEntityState`]
/// so the timer is retired without retry.
#[async_trait]
pub trait EntityDirectory: Send + Sync {
    /// Verify the entity exists and still admits the transition.
    async fn check(&self, entity: EntityRef, status_type: StatusType) -> Result<(), FireError>;

    /// Apply the transition's side effect. Failures map to
    /// [`FireError::Transient`] unless the entity itself is the problem.
    async fn apply(&self, entity: EntityRef, record: &TimerRecord) -> Result<(), FireError>;
}
