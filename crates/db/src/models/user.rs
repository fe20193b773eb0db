//! Forum user rows, as far as the moderation expiries touch them.

use agora_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `forum_users` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ForumUser {
    pub id: DbId,
    pub username: String,
    pub suspended_at: Option<Timestamp>,
    pub suspended_till: Option<Timestamp>,
    pub silenced_at: Option<Timestamp>,
    pub silenced_till: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ForumUser {
    pub fn is_suspended(&self) -> bool {
        self.suspended_till.is_some()
    }

    pub fn is_silenced(&self) -> bool {
        self.silenced_till.is_some()
    }
}
