//! Durable event persistence service.
//!
//! [`EventPersistence`] subscribes to the [`EventBus`](crate::bus::EventBus)
//! broadcast channel and writes every received event to the `events`
//! table. It runs as a long-lived background task and shuts down when the
//! bus sender is dropped.

use agora_core::types::DbId;
use agora_db::repositories::EventRepo;
use agora_db::DbPool;
use tokio::sync::broadcast;

use crate::bus::ModerationEvent;

/// Background service that persists moderation events to the database.
pub struct EventPersistence;

impl EventPersistence {
    /// Run the persistence loop until the channel closes.
    pub async fn run(pool: DbPool, mut receiver: broadcast::Receiver<ModerationEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(e) = Self::persist(&pool, &event).await {
                        tracing::error!(
                            error = %e,
                            event_type = %event.event_type,
                            "Failed to persist event"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        skipped = n,
                        "Event persistence lagged, some events were not persisted"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, persistence shutting down");
                    break;
                }
            }
        }
    }

    /// Write a single event to the `events` table, resolving the type name
    /// to its `event_types.id` foreign key first. Unregistered event names
    /// are logged and dropped rather than failing the loop.
    async fn persist(pool: &DbPool, event: &ModerationEvent) -> Result<Option<DbId>, sqlx::Error> {
        let Some(event_type) = EventRepo::get_event_type_by_name(pool, &event.event_type).await?
        else {
            tracing::warn!(event_type = %event.event_type, "Unregistered event type, dropping");
            return Ok(None);
        };

        let id = EventRepo::insert(
            pool,
            event_type.id,
            event.subject_kind.map(|k| k.id()),
            event.subject_id,
            event.actor_user_id,
            &event.payload,
        )
        .await?;
        Ok(Some(id))
    }
}
