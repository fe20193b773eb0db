//! Repository for the `forum_users` table.

use agora_core::types::DbId;
use sqlx::PgPool;

use crate::models::user::ForumUser;

/// Column list for `forum_users` queries.
const COLUMNS: &str = "\
    id, username, suspended_at, suspended_till, silenced_at, silenced_till, \
    created_at, updated_at";

/// Provides lookups and the moderation-expiry transitions for users.
pub struct UserRepo;

impl UserRepo {
    /// Find a user by their ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ForumUser>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM forum_users WHERE id = $1");
        sqlx::query_as::<_, ForumUser>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Lift a suspension. Returns `false` when the user is gone or was
    /// not suspended.
    pub async fn unsuspend(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE forum_users \
             SET suspended_till = NULL, suspended_at = NULL, updated_at = NOW() \
             WHERE id = $1 AND suspended_till IS NOT NULL",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Lift a silence. Returns `false` when the user is gone or was not
    /// silenced.
    pub async fn unsilence(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE forum_users \
             SET silenced_till = NULL, silenced_at = NULL, updated_at = NOW() \
             WHERE id = $1 AND silenced_till IS NOT NULL",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
