//! End-to-end engine tests: scheduler + sweeper over the in-memory store
//! with a deterministic clock and counting collaborator stubs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use agora_core::error::FireError;
use agora_core::timers::{StatusType, TimerState};
use agora_core::types::{DbId, Timestamp};
use agora_timers::{
    Clock, EntityDirectory, EntityRef, FireOutcome, ManualClock, MemoryTimerStore, NoopNotifier,
    SetTimer, SweepConfig, TimerNotifier, TimerRecord, TimerScheduler, TimerSpec, TimerStore,
    TimerSweeper,
};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Stubs
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum ApplyBehavior {
    Succeed,
    FailTransient(String),
    Hang,
}

/// Entity directory stub that counts side-effect invocations.
struct StubDirectory {
    applied: AtomicUsize,
    check_error: Mutex<Option<FireError>>,
    apply_behavior: Mutex<ApplyBehavior>,
}

impl StubDirectory {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            applied: AtomicUsize::new(0),
            check_error: Mutex::new(None),
            apply_behavior: Mutex::new(ApplyBehavior::Succeed),
        })
    }

    fn applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }

    fn fail_check_with(&self, error: FireError) {
        *self.check_error.lock().unwrap() = Some(error);
    }

    fn apply_with(&self, behavior: ApplyBehavior) {
        *self.apply_behavior.lock().unwrap() = behavior;
    }
}

#[async_trait]
impl EntityDirectory for StubDirectory {
    async fn check(&self, _entity: EntityRef, _status_type: StatusType) -> Result<(), FireError> {
        match self.check_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn apply(&self, _entity: EntityRef, _record: &TimerRecord) -> Result<(), FireError> {
        let behavior = self.apply_behavior.lock().unwrap().clone();
        match behavior {
            ApplyBehavior::Succeed => {
                self.applied.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            ApplyBehavior::FailTransient(reason) => Err(FireError::Transient(reason)),
            ApplyBehavior::Hang => std::future::pending().await,
        }
    }
}

/// Notifier stub that records every fired outcome.
#[derive(Default)]
struct RecordingNotifier {
    fired: Mutex<Vec<(DbId, FireOutcome)>>,
}

impl TimerNotifier for RecordingNotifier {
    fn timer_scheduled(&self, _record: &TimerRecord) {}
    fn timer_cancelled(&self, _record: &TimerRecord) {}
    fn timer_fired(&self, record: &TimerRecord, outcome: &FireOutcome) {
        self.fired.lock().unwrap().push((record.id, outcome.clone()));
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    store: Arc<MemoryTimerStore>,
    clock: Arc<ManualClock>,
    directory: Arc<StubDirectory>,
    notifier: Arc<RecordingNotifier>,
    scheduler: TimerScheduler,
    sweeper: TimerSweeper,
}

fn start() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

fn harness_with(config: SweepConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(MemoryTimerStore::with_clock(clock.clone()));
    let directory = StubDirectory::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let scheduler = TimerScheduler::new(store.clone(), clock.clone(), Arc::new(NoopNotifier));
    let sweeper = TimerSweeper::new(
        store.clone(),
        directory.clone(),
        notifier.clone(),
        clock.clone(),
        config,
    );
    Harness {
        store,
        clock,
        directory,
        notifier,
        scheduler,
        sweeper,
    }
}

fn harness() -> Harness {
    harness_with(SweepConfig {
        max_attempts: 3,
        retry_backoff_secs: 60,
        ..SweepConfig::default()
    })
}

fn close_in(entity: EntityRef, minutes: i32) -> SetTimer {
    SetTimer {
        entity,
        status_type: StatusType::Close,
        spec: TimerSpec::In { minutes },
        based_on_last_post: false,
        category_id: None,
        acting_user: 1,
    }
}

// ---------------------------------------------------------------------------
// Liveness and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn set_then_cancel_never_fires() {
    let h = harness();
    let topic = EntityRef::topic(1);
    h.scheduler.set_timer(close_in(topic, 60)).await.unwrap();
    h.scheduler
        .cancel_timer(topic, StatusType::Close)
        .await
        .unwrap();

    h.clock.advance(Duration::days(30));
    let claimed = h.sweeper.sweep_once().await.unwrap();

    assert_eq!(claimed, 0);
    assert_eq!(h.directory.applied(), 0);
}

#[tokio::test]
async fn one_active_record_per_slot_after_any_sequence() {
    let h = harness();
    let topic = EntityRef::topic(1);
    h.scheduler.set_timer(close_in(topic, 60)).await.unwrap();
    h.scheduler.set_timer(close_in(topic, 120)).await.unwrap();
    h.scheduler
        .cancel_timer(topic, StatusType::Close)
        .await
        .unwrap();
    h.scheduler.set_timer(close_in(topic, 240)).await.unwrap();

    let records = h.store.list_for_entity(topic).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].execute_at,
        Some(start() + Duration::minutes(240))
    );
}

#[tokio::test]
async fn rescheduling_fires_at_the_replacement_time_only() {
    let h = harness();
    let topic = EntityRef::topic(1);
    h.scheduler.set_timer(close_in(topic, 60)).await.unwrap();
    h.scheduler.set_timer(close_in(topic, 240)).await.unwrap();

    // Past the first time, before the second: nothing fires.
    h.clock.advance(Duration::minutes(90));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 0);

    h.clock.advance(Duration::minutes(200));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);
    assert_eq!(h.directory.applied(), 1);
}

#[tokio::test]
async fn cancel_during_in_flight_claim_suppresses_the_rearm() {
    let h = harness();
    let topic = EntityRef::topic(1);
    h.scheduler
        .set_timer(SetTimer {
            status_type: StatusType::Bump,
            ..close_in(topic, 30)
        })
        .await
        .unwrap();

    // A worker claims the due record...
    h.clock.advance(Duration::minutes(31));
    let token = Uuid::new_v4();
    let claimed = h
        .store
        .claim_due(h.clock.now(), Duration::minutes(5), token, 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    let record = &claimed[0];

    // ...an administrator cancels while the firing is in flight...
    h.scheduler
        .cancel_timer(topic, StatusType::Bump)
        .await
        .unwrap();

    // ...the worker's re-arm loses to the cancellation.
    let rearmed = h
        .store
        .complete_repeating(
            record.id,
            token,
            h.clock.now(),
            h.clock.now() + Duration::minutes(30),
        )
        .await
        .unwrap();
    assert!(!rearmed);

    let row = h
        .store
        .find_slot(topic, StatusType::Bump.slot())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.execute_at, None);
    assert_eq!(row.state, TimerState::Completed);
}

// ---------------------------------------------------------------------------
// At-most-once execution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn racing_sweepers_fire_exactly_once() {
    let h = harness();
    let second_sweeper = TimerSweeper::new(
        h.store.clone(),
        h.directory.clone(),
        h.notifier.clone(),
        h.clock.clone(),
        SweepConfig::default(),
    );

    h.scheduler
        .set_timer(close_in(EntityRef::topic(1), 10))
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(11));

    let (a, b) = tokio::join!(h.sweeper.sweep_once(), second_sweeper.sweep_once());
    assert_eq!(a.unwrap() + b.unwrap(), 1);
    assert_eq!(h.directory.applied(), 1);
}

#[tokio::test]
async fn abandoned_claims_are_recovered_after_expiry() {
    let h = harness();
    let topic = EntityRef::topic(1);
    h.scheduler.set_timer(close_in(topic, 10)).await.unwrap();
    h.clock.advance(Duration::minutes(10));

    // Simulate a worker that claimed the record and crashed.
    let crashed = h
        .store
        .claim_due(h.clock.now(), Duration::minutes(5), Uuid::new_v4(), 10)
        .await
        .unwrap();
    assert_eq!(crashed.len(), 1);

    // Within the lease the sweeper leaves it alone.
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 0);

    // After claim expiry the record is claimable again and fires.
    h.clock.advance(Duration::minutes(6));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);
    assert_eq!(h.directory.applied(), 1);
}

// ---------------------------------------------------------------------------
// One-shot vs repeating
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_shot_timers_retire_after_firing() {
    let h = harness();
    let topic = EntityRef::topic(1);
    h.scheduler.set_timer(close_in(topic, 15)).await.unwrap();

    h.clock.advance(Duration::minutes(16));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);

    let row = h
        .store
        .find_slot(topic, StatusType::Close.slot())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.state, TimerState::Completed);
    assert_eq!(row.execute_at, None);
    assert!(row.last_executed_at.is_some());

    // Advancing further produces no second firing.
    h.clock.advance(Duration::days(7));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 0);
    assert_eq!(h.directory.applied(), 1);
}

#[tokio::test]
async fn bump_timers_rearm_strictly_forward() {
    let h = harness();
    let topic = EntityRef::topic(1);
    h.scheduler
        .set_timer(SetTimer {
            status_type: StatusType::Bump,
            ..close_in(topic, 60)
        })
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(75));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);

    let row = h
        .store
        .find_slot(topic, StatusType::Bump.slot())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.state, TimerState::Scheduled);
    let next = row.execute_at.expect("bump timer should stay armed");
    assert!(next > start() + Duration::minutes(60));
    assert_eq!(next, h.clock.now() + Duration::minutes(60));

    // And it fires again at the new time.
    h.clock.advance(Duration::minutes(61));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);
    assert_eq!(h.directory.applied(), 2);
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn vanished_entity_goes_terminal_without_retry() {
    let h = harness();
    let topic = EntityRef::topic(404);
    h.scheduler.set_timer(close_in(topic, 5)).await.unwrap();
    h.directory.fail_check_with(FireError::EntityGone);

    h.clock.advance(Duration::minutes(6));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);
    assert_eq!(h.directory.applied(), 0);

    let row = h
        .store
        .find_slot(topic, StatusType::Close.slot())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.state, TimerState::FailedTerminal);
    assert_eq!(row.execute_at, None);

    let fired = h.notifier.fired.lock().unwrap();
    assert!(matches!(fired.as_slice(), [(_, FireOutcome::Terminal(_))]));
}

#[tokio::test]
async fn incompatible_entity_state_goes_terminal() {
    let h = harness();
    let topic = EntityRef::topic(1);
    h.scheduler.set_timer(close_in(topic, 5)).await.unwrap();
    h.directory
        .fail_check_with(FireError::IncompatibleEntityState(
            "topic is already closed".into(),
        ));

    h.clock.advance(Duration::minutes(6));
    h.sweeper.sweep_once().await.unwrap();

    let row = h
        .store
        .find_slot(topic, StatusType::Close.slot())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.state, TimerState::FailedTerminal);
    assert!(row
        .last_error
        .as_deref()
        .unwrap()
        .contains("already closed"));
}

#[tokio::test]
async fn transient_failures_back_off_then_go_terminal() {
    let h = harness(); // max_attempts = 3, backoff base 60s
    let topic = EntityRef::topic(1);
    h.scheduler.set_timer(close_in(topic, 1)).await.unwrap();
    h.directory
        .apply_with(ApplyBehavior::FailTransient("db hiccup".into()));

    // First attempt: retryable, execute_at pushed out by the base backoff.
    h.clock.advance(Duration::minutes(2));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);
    let row = h
        .store
        .find_slot(topic, StatusType::Close.slot())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.state, TimerState::FailedRetryable);
    assert_eq!(row.attempts, 1);
    assert_eq!(row.execute_at, Some(h.clock.now() + Duration::seconds(60)));

    // Not due again until the backoff elapses.
    h.clock.advance(Duration::seconds(30));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 0);

    // Second attempt: still retryable.
    h.clock.advance(Duration::seconds(31));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);

    // Third attempt exhausts the bound and clears the timer.
    h.clock.advance(Duration::minutes(10));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);
    let row = h
        .store
        .find_slot(topic, StatusType::Close.slot())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.state, TimerState::FailedTerminal);
    assert_eq!(row.execute_at, None);
    assert!(row.last_error.as_deref().unwrap().contains("retries exhausted"));
}

#[tokio::test]
async fn hung_side_effect_is_bounded_by_the_firing_timeout() {
    let h = harness_with(SweepConfig {
        fire_timeout_secs: 0,
        max_attempts: 3,
        ..SweepConfig::default()
    });
    let topic = EntityRef::topic(1);
    h.scheduler.set_timer(close_in(topic, 1)).await.unwrap();
    h.directory.apply_with(ApplyBehavior::Hang);

    h.clock.advance(Duration::minutes(2));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);

    let row = h
        .store
        .find_slot(topic, StatusType::Close.slot())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.state, TimerState::FailedRetryable);
    assert!(row.last_error.as_deref().unwrap().contains("timed out"));
}

// ---------------------------------------------------------------------------
// Activity-based recomputation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recomputed_timer_fires_at_the_shifted_time() {
    let h = harness();
    let topic = EntityRef::topic(1);
    h.scheduler
        .set_timer(SetTimer {
            status_type: StatusType::CloseAfterLastPost,
            ..close_in(topic, 120)
        })
        .await
        .unwrap();

    // A post arrives an hour in; the window restarts from it.
    let post_at = start() + Duration::minutes(60);
    h.scheduler
        .recompute_from_last_post(topic, post_at)
        .await
        .unwrap();

    // The original execution time passes without a firing.
    h.clock.set(start() + Duration::minutes(130));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 0);

    // The shifted time fires.
    h.clock.set(post_at + Duration::minutes(121));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);
    assert_eq!(h.directory.applied(), 1);
}
