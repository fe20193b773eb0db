//! The timer sweep worker.
//!
//! Connects to Postgres, runs migrations, and drives the sweep loop plus
//! the event persistence and optional webhook fan-out tasks. Several
//! instances may run side by side; the store's claim semantics keep each
//! firing at-most-once.

use std::sync::Arc;

use agora_db::{PgEntityDirectory, PgTimerStore};
use agora_events::{BusNotifier, EventBus, EventPersistence, WebhookFanout};
use agora_timers::{SweepConfig, SystemClock, TimerSweeper};
use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agora_worker=debug,agora_timers=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = agora_db::create_pool(&database_url)
        .await
        .context("failed to connect to the database")?;
    agora_db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let bus = Arc::new(EventBus::default());
    tokio::spawn(EventPersistence::run(pool.clone(), bus.subscribe()));

    if let Ok(raw) = std::env::var("TIMER_WEBHOOK_URLS") {
        let urls: Vec<String> = raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !urls.is_empty() {
            tracing::info!(count = urls.len(), "Webhook fan-out enabled");
            tokio::spawn(WebhookFanout::new(urls).run(bus.subscribe()));
        }
    }

    let sweeper = TimerSweeper::new(
        Arc::new(PgTimerStore::new(pool.clone())),
        Arc::new(PgEntityDirectory::new(pool)),
        Arc::new(BusNotifier::new(bus)),
        Arc::new(SystemClock),
        SweepConfig::from_env(),
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            signal_cancel.cancel();
        }
    });

    sweeper.run(cancel).await;
    Ok(())
}
