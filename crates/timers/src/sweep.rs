//! The execution engine: a recurring sweep over due timers.
//!
//! Each pass claims due records through the store's single-winner claim,
//! re-validates the entity, applies the transition under a timeout, and
//! settles the record: one-shot kinds retire, repeating kinds re-arm,
//! transient failures back off and retry up to a bound, terminal failures
//! clear the timer. The sweeper holds no state between passes — several
//! instances may run against the same store.

use std::sync::Arc;

use agora_core::error::FireError;
use agora_core::types::Timestamp;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::SweepConfig;
use crate::entity::EntityDirectory;
use crate::notify::{FireOutcome, TimerNotifier};
use crate::record::TimerRecord;
use crate::store::{StoreError, TimerStore};

/// Background service that fires due timers.
pub struct TimerSweeper {
    store: Arc<dyn TimerStore>,
    entities: Arc<dyn EntityDirectory>,
    notifier: Arc<dyn TimerNotifier>,
    clock: Arc<dyn Clock>,
    config: SweepConfig,
}

impl TimerSweeper {
    pub fn new(
        store: Arc<dyn TimerStore>,
        entities: Arc<dyn EntityDirectory>,
        notifier: Arc<dyn TimerNotifier>,
        clock: Arc<dyn Clock>,
        config: SweepConfig,
    ) -> Self {
        Self {
            store,
            entities,
            notifier,
            clock,
            config,
        }
    }

    /// Run the sweep loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        tracing::info!(
            interval_secs = self.config.sweep_interval_secs,
            batch_size = self.config.batch_size,
            "Timer sweeper started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Timer sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(fired) if fired > 0 => {
                            tracing::debug!(fired, "Sweep pass fired timers");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Sweep pass failed");
                        }
                    }
                }
            }
        }
    }

    /// One sweep pass: claim everything due and fire each record.
    /// Returns the number of records claimed.
    pub async fn sweep_once(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let claim_token = Uuid::new_v4();
        let due = self
            .store
            .claim_due(now, self.config.claim_expiry(), claim_token, self.config.batch_size)
            .await?;
        let claimed = due.len();

        for record in due {
            self.fire(record, claim_token).await;
        }
        Ok(claimed)
    }

    /// Fire one claimed record and settle its state.
    async fn fire(&self, record: TimerRecord, claim_token: Uuid) {
        // Re-validate before touching anything: the entity may have been
        // deleted or moderated into a state the transition no longer
        // applies to since the timer was armed.
        match self.entities.check(record.entity, record.status_type).await {
            Ok(()) => {}
            Err(FireError::Transient(reason)) => {
                self.settle_transient(&record, claim_token, reason).await;
                return;
            }
            Err(e) => {
                self.settle_terminal(&record, claim_token, e.to_string()).await;
                return;
            }
        }

        let applied = tokio::time::timeout(
            self.config.fire_timeout(),
            self.entities.apply(record.entity, &record),
        )
        .await;

        match applied {
            Err(_elapsed) => {
                self.settle_transient(&record, claim_token, "transition timed out".to_string())
                    .await;
            }
            Ok(Err(FireError::Transient(reason))) => {
                self.settle_transient(&record, claim_token, reason).await;
            }
            Ok(Err(e)) => {
                self.settle_terminal(&record, claim_token, e.to_string()).await;
            }
            Ok(Ok(())) => {
                self.settle_success(&record, claim_token).await;
            }
        }
    }

    /// Transition applied: retire one-shot kinds, re-arm repeating kinds.
    async fn settle_success(&self, record: &TimerRecord, claim_token: Uuid) {
        let fired_at = self.clock.now();
        let policy = record.status_type.policy();

        let settled = if policy.repeating {
            match record.duration_minutes {
                Some(minutes) => {
                    let next_at = fired_at + chrono::Duration::minutes(i64::from(minutes));
                    match self
                        .store
                        .complete_repeating(record.id, claim_token, fired_at, next_at)
                        .await
                    {
                        Ok(true) => Some(FireOutcome::Rescheduled(next_at)),
                        Ok(false) => {
                            // Cancelled mid-flight (or claim lost): the
                            // firing stands, the re-arm does not.
                            Some(FireOutcome::Completed)
                        }
                        Err(e) => {
                            tracing::error!(timer_id = record.id, error = %e, "Failed to re-arm repeating timer");
                            None
                        }
                    }
                }
                None => {
                    // A repeating record without a stored offset cannot
                    // re-arm itself; retire it like a one-shot.
                    tracing::warn!(
                        timer_id = record.id,
                        "Repeating timer has no duration, retiring"
                    );
                    self.complete_one_shot(record, claim_token, fired_at).await
                }
            }
        } else {
            self.complete_one_shot(record, claim_token, fired_at).await
        };

        if let Some(outcome) = settled {
            tracing::info!(
                timer_id = record.id,
                entity_kind = %record.entity.kind,
                entity_id = record.entity.id,
                status_type = %record.status_type,
                "Timer fired",
            );
            self.notifier.timer_fired(record, &outcome);
        }
    }

    async fn complete_one_shot(
        &self,
        record: &TimerRecord,
        claim_token: Uuid,
        fired_at: Timestamp,
    ) -> Option<FireOutcome> {
        match self
            .store
            .complete_one_shot(record.id, claim_token, fired_at)
            .await
        {
            Ok(true) => Some(FireOutcome::Completed),
            Ok(false) => {
                tracing::debug!(timer_id = record.id, "Claim lost before completion");
                None
            }
            Err(e) => {
                tracing::error!(timer_id = record.id, error = %e, "Failed to complete timer");
                None
            }
        }
    }

    /// Transient failure: back off and retry, up to the attempt bound.
    async fn settle_transient(&self, record: &TimerRecord, claim_token: Uuid, reason: String) {
        let attempt = record.attempts + 1;
        if attempt >= self.config.max_attempts {
            self.settle_terminal(
                record,
                claim_token,
                format!("retries exhausted after {attempt} attempts: {reason}"),
            )
            .await;
            return;
        }

        let retry_at = self.clock.now() + self.config.retry_backoff(attempt);
        match self
            .store
            .fail_retryable(record.id, claim_token, &reason, retry_at)
            .await
        {
            Ok(true) => {
                tracing::warn!(
                    timer_id = record.id,
                    attempt,
                    retry_at = %retry_at,
                    error = %reason,
                    "Timer firing failed, will retry",
                );
                self.notifier
                    .timer_fired(record, &FireOutcome::Retrying { attempt, retry_at });
            }
            Ok(false) => {
                tracing::debug!(timer_id = record.id, "Claim lost before retry settle");
            }
            Err(e) => {
                tracing::error!(timer_id = record.id, error = %e, "Failed to record retryable failure");
            }
        }
    }

    /// Terminal failure: clear the timer, keep the reason for audit.
    async fn settle_terminal(&self, record: &TimerRecord, claim_token: Uuid, reason: String) {
        match self
            .store
            .fail_terminal(record.id, claim_token, &reason)
            .await
        {
            Ok(true) => {
                tracing::warn!(
                    timer_id = record.id,
                    entity_kind = %record.entity.kind,
                    entity_id = record.entity.id,
                    status_type = %record.status_type,
                    error = %reason,
                    "Timer failed terminally, cleared",
                );
                self.notifier
                    .timer_fired(record, &FireOutcome::Terminal(reason));
            }
            Ok(false) => {
                tracing::debug!(timer_id = record.id, "Claim lost before terminal settle");
            }
            Err(e) => {
                tracing::error!(timer_id = record.id, error = %e, "Failed to record terminal failure");
            }
        }
    }
}
