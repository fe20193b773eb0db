//! Repository for the `topics` and `posts` tables.

use agora_core::types::DbId;
use sqlx::PgPool;

use crate::models::topic::Topic;

/// Column list for `topics` queries.
const COLUMNS: &str = "\
    id, title, category_id, closed, visible, bumped_at, deleted_at, \
    created_at, updated_at";

/// Provides lookups and the timer-driven state transitions for topics.
pub struct TopicRepo;

impl TopicRepo {
    /// Find a topic by its ID, deleted or not.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Topic>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM topics WHERE id = $1");
        sqlx::query_as::<_, Topic>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Close or reopen a topic. Returns `false` when the topic is gone
    /// or soft-deleted.
    pub async fn set_closed(pool: &PgPool, id: DbId, closed: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE topics SET closed = $2, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(closed)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a topic into a category and make it visible.
    pub async fn publish(
        pool: &PgPool,
        id: DbId,
        category_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE topics SET category_id = $2, visible = TRUE, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(category_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete a topic.
    pub async fn soft_delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE topics SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Refresh the topic's bump timestamp so it surfaces in listings.
    pub async fn bump(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE topics SET bumped_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete every reply, keeping the first post. Returns the number
    /// of posts affected.
    pub async fn soft_delete_replies(pool: &PgPool, topic_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE posts SET deleted_at = NOW() \
             WHERE topic_id = $1 AND post_number > 1 AND deleted_at IS NULL",
        )
        .bind(topic_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
