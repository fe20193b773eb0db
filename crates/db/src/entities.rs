//! Entity directory over the real topic and user tables.
//!
//! `check` runs after a sweep claims a record, so the rules here are the
//! last line against stale timers: an entity that was deleted, or already
//! moderated into the target state by hand, retires the timer instead of
//! firing it.

use agora_core::error::FireError;
use agora_core::timers::{EntityKind, StatusType};
use agora_timers::{EntityDirectory, EntityRef, TimerRecord};
use async_trait::async_trait;

use crate::models::topic::Topic;
use crate::models::user::ForumUser;
use crate::repositories::{TopicRepo, UserRepo};
use crate::DbPool;

/// [`EntityDirectory`] backed by the `topics` and `forum_users` tables.
pub struct PgEntityDirectory {
    pool: DbPool,
}

impl PgEntityDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_topic(&self, id: i64) -> Result<Topic, FireError> {
        TopicRepo::find_by_id(&self.pool, id)
            .await
            .map_err(|e| FireError::Transient(e.to_string()))?
            .ok_or(FireError::EntityGone)
    }

    async fn load_user(&self, id: i64) -> Result<ForumUser, FireError> {
        UserRepo::find_by_id(&self.pool, id)
            .await
            .map_err(|e| FireError::Transient(e.to_string()))?
            .ok_or(FireError::EntityGone)
    }

    fn check_topic(topic: &Topic, status_type: StatusType) -> Result<(), FireError> {
        if topic.deleted_at.is_some() {
            return Err(FireError::IncompatibleEntityState(
                "topic has been deleted".to_string(),
            ));
        }
        match status_type {
            StatusType::Close | StatusType::CloseAfterLastPost if topic.closed => Err(
                FireError::IncompatibleEntityState("topic is already closed".to_string()),
            ),
            StatusType::Open if !topic.closed => Err(FireError::IncompatibleEntityState(
                "topic is already open".to_string(),
            )),
            StatusType::PublishToCategory if topic.visible => {
                Err(FireError::IncompatibleEntityState(
                    "topic is already publicly visible".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    fn check_user(user: &ForumUser, status_type: StatusType) -> Result<(), FireError> {
        match status_type {
            // A moderator may have lifted the penalty by hand already.
            StatusType::Unsuspend if !user.is_suspended() => Err(
                FireError::IncompatibleEntityState("suspension already lifted".to_string()),
            ),
            StatusType::Unsilence if !user.is_silenced() => Err(
                FireError::IncompatibleEntityState("silence already lifted".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl EntityDirectory for PgEntityDirectory {
    async fn check(&self, entity: EntityRef, status_type: StatusType) -> Result<(), FireError> {
        match entity.kind {
            EntityKind::Topic => {
                let topic = self.load_topic(entity.id).await?;
                Self::check_topic(&topic, status_type)
            }
            EntityKind::User => {
                let user = self.load_user(entity.id).await?;
                Self::check_user(&user, status_type)
            }
        }
    }

    async fn apply(&self, entity: EntityRef, record: &TimerRecord) -> Result<(), FireError> {
        let transient = |e: sqlx::Error| FireError::Transient(e.to_string());

        let touched = match record.status_type {
            StatusType::Close | StatusType::CloseAfterLastPost => {
                TopicRepo::set_closed(&self.pool, entity.id, true)
                    .await
                    .map_err(transient)?
            }
            StatusType::Open => TopicRepo::set_closed(&self.pool, entity.id, false)
                .await
                .map_err(transient)?,
            StatusType::PublishToCategory => {
                let category_id = record.category_id.ok_or_else(|| {
                    FireError::IncompatibleEntityState(
                        "publish timer lost its category".to_string(),
                    )
                })?;
                TopicRepo::publish(&self.pool, entity.id, category_id)
                    .await
                    .map_err(transient)?
            }
            StatusType::Delete => TopicRepo::soft_delete(&self.pool, entity.id)
                .await
                .map_err(transient)?,
            StatusType::Bump => TopicRepo::bump(&self.pool, entity.id)
                .await
                .map_err(transient)?,
            StatusType::DeleteReplies => {
                TopicRepo::soft_delete_replies(&self.pool, entity.id)
                    .await
                    .map_err(transient)?;
                true
            }
            StatusType::Unsuspend => UserRepo::unsuspend(&self.pool, entity.id)
                .await
                .map_err(transient)?,
            StatusType::Unsilence => UserRepo::unsilence(&self.pool, entity.id)
                .await
                .map_err(transient)?,
        };

        if !touched {
            // The row vanished between check and apply.
            return Err(FireError::EntityGone);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn topic(closed: bool, visible: bool, deleted: bool) -> Topic {
        let now = Utc::now();
        Topic {
            id: 1,
            title: "t".to_string(),
            category_id: None,
            closed,
            visible,
            bumped_at: now,
            deleted_at: deleted.then_some(now),
            created_at: now,
            updated_at: now,
        }
    }

    fn user(suspended: bool, silenced: bool) -> ForumUser {
        let now = Utc::now();
        ForumUser {
            id: 1,
            username: "eve".to_string(),
            suspended_at: suspended.then_some(now),
            suspended_till: suspended.then_some(now + chrono::Duration::days(7)),
            silenced_at: silenced.then_some(now),
            silenced_till: silenced.then_some(now + chrono::Duration::days(7)),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn closing_an_open_topic_is_compatible() {
        assert!(PgEntityDirectory::check_topic(&topic(false, true, false), StatusType::Close).is_ok());
    }

    #[test]
    fn closing_a_closed_topic_is_incompatible() {
        let err =
            PgEntityDirectory::check_topic(&topic(true, true, false), StatusType::Close).unwrap_err();
        assert!(matches!(err, FireError::IncompatibleEntityState(_)));
    }

    #[test]
    fn nothing_applies_to_a_deleted_topic() {
        for status in [StatusType::Close, StatusType::Open, StatusType::Delete] {
            assert!(
                PgEntityDirectory::check_topic(&topic(false, true, true), status).is_err(),
                "{status}"
            );
        }
    }

    #[test]
    fn publishing_a_hidden_topic_is_compatible() {
        assert!(PgEntityDirectory::check_topic(
            &topic(false, false, false),
            StatusType::PublishToCategory
        )
        .is_ok());
    }

    #[test]
    fn unsuspend_requires_an_active_suspension() {
        assert!(PgEntityDirectory::check_user(&user(true, false), StatusType::Unsuspend).is_ok());
        let err =
            PgEntityDirectory::check_user(&user(false, false), StatusType::Unsuspend).unwrap_err();
        assert!(matches!(err, FireError::IncompatibleEntityState(_)));
    }

    #[test]
    fn unsilence_requires_an_active_silence() {
        assert!(PgEntityDirectory::check_user(&user(false, true), StatusType::Unsilence).is_ok());
        assert!(PgEntityDirectory::check_user(&user(false, false), StatusType::Unsilence).is_err());
    }
}
