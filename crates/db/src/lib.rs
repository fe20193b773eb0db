//! Postgres persistence for the agora timer subsystem.
//!
//! Repositories are zero-sized structs providing async CRUD methods that
//! accept `&PgPool` as the first argument. The [`store::PgTimerStore`] and
//! [`entities::PgEntityDirectory`] adapters implement the engine's
//! collaborator contracts on top of them.

use sqlx::postgres::PgPoolOptions;

pub mod entities;
pub mod models;
pub mod repositories;
pub mod store;

pub use entities::PgEntityDirectory;
pub use store::PgTimerStore;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Apply all pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Cheap connectivity probe.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
