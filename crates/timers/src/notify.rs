//! Notification/audit hook.

use agora_core::types::Timestamp;

use crate::record::TimerRecord;

/// What happened when a claimed timer fired.
#[derive(Debug, Clone, PartialEq)]
pub enum FireOutcome {
    /// One-shot transition applied; the timer is now inert.
    Completed,
    /// Repeating transition applied; next execution at the given time.
    Rescheduled(Timestamp),
    /// Transient failure; another attempt is scheduled.
    Retrying { attempt: i16, retry_at: Timestamp },
    /// Terminal failure; the timer was cleared.
    Terminal(String),
}

/// Fire-and-forget side channel invoked on schedule, cancellation, and
/// execution. Implementations must not block: the engine calls these
/// inline on its critical path. The bus-backed implementation lives in
/// `agora-events`.
pub trait TimerNotifier: Send + Sync {
    fn timer_scheduled(&self, record: &TimerRecord);
    fn timer_cancelled(&self, record: &TimerRecord);
    fn timer_fired(&self, record: &TimerRecord, outcome: &FireOutcome);
}

/// Discards every notification.
#[derive(Debug, Default)]
pub struct NoopNotifier;

impl TimerNotifier for NoopNotifier {
    fn timer_scheduled(&self, _record: &TimerRecord) {}
    fn timer_cancelled(&self, _record: &TimerRecord) {}
    fn timer_fired(&self, _record: &TimerRecord, _outcome: &FireOutcome) {}
}
