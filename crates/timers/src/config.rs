//! Sweep configuration loaded from environment variables.

use std::time::Duration;

/// Operator-facing tuning knobs for the execution engine.
///
/// All fields have defaults suitable for local development; in production,
/// override via environment variables.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Seconds between sweep passes (default: `60`).
    pub sweep_interval_secs: u64,
    /// Seconds after which an unsettled claim is considered abandoned and
    /// the record becomes claimable again (default: `300`).
    pub claim_expiry_secs: i64,
    /// Failed attempts before a record goes terminal (default: `5`).
    pub max_attempts: i16,
    /// Seconds a single side-effect invocation may run before it is
    /// treated as a transient failure (default: `30`).
    pub fire_timeout_secs: u64,
    /// Maximum records claimed per sweep pass (default: `100`).
    pub batch_size: i64,
    /// Base retry delay in seconds; doubles with each failed attempt
    /// (default: `60`).
    pub retry_backoff_secs: i64,
    /// Cap on the retry delay in seconds (default: `3600`).
    pub max_backoff_secs: i64,
}

impl SweepConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default |
    /// |----------------------------|---------|
    /// | `TIMER_SWEEP_INTERVAL_SECS`| `60`    |
    /// | `TIMER_CLAIM_EXPIRY_SECS`  | `300`   |
    /// | `TIMER_MAX_ATTEMPTS`       | `5`     |
    /// | `TIMER_FIRE_TIMEOUT_SECS`  | `30`    |
    /// | `TIMER_BATCH_SIZE`         | `100`   |
    /// | `TIMER_RETRY_BACKOFF_SECS` | `60`    |
    /// | `TIMER_MAX_BACKOFF_SECS`   | `3600`  |
    pub fn from_env() -> Self {
        Self {
            sweep_interval_secs: env_parsed("TIMER_SWEEP_INTERVAL_SECS", 60),
            claim_expiry_secs: env_parsed("TIMER_CLAIM_EXPIRY_SECS", 300),
            max_attempts: env_parsed("TIMER_MAX_ATTEMPTS", 5),
            fire_timeout_secs: env_parsed("TIMER_FIRE_TIMEOUT_SECS", 30),
            batch_size: env_parsed("TIMER_BATCH_SIZE", 100),
            retry_backoff_secs: env_parsed("TIMER_RETRY_BACKOFF_SECS", 60),
            max_backoff_secs: env_parsed("TIMER_MAX_BACKOFF_SECS", 3600),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn fire_timeout(&self) -> Duration {
        Duration::from_secs(self.fire_timeout_secs)
    }

    pub fn claim_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_expiry_secs)
    }

    /// Backoff delay before retry number `attempt` (1-based), doubling per
    /// attempt and capped at `max_backoff_secs`.
    pub fn retry_backoff(&self, attempt: i16) -> chrono::Duration {
        let exp = u32::from(attempt.saturating_sub(1).clamp(0, 16) as u16);
        let secs = self
            .retry_backoff_secs
            .saturating_mul(1_i64 << exp)
            .min(self.max_backoff_secs);
        chrono::Duration::seconds(secs)
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            claim_expiry_secs: 300,
            max_attempts: 5,
            fire_timeout_secs: 30,
            batch_size: 100,
            retry_backoff_secs: 60,
            max_backoff_secs: 3600,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid number")),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let config = SweepConfig {
            retry_backoff_secs: 60,
            max_backoff_secs: 300,
            ..SweepConfig::default()
        };
        assert_eq!(config.retry_backoff(1).num_seconds(), 60);
        assert_eq!(config.retry_backoff(2).num_seconds(), 120);
        assert_eq!(config.retry_backoff(3).num_seconds(), 240);
        assert_eq!(config.retry_backoff(4).num_seconds(), 300);
        assert_eq!(config.retry_backoff(10).num_seconds(), 300);
    }

    #[test]
    fn defaults_are_minutes_scale() {
        let config = SweepConfig::default();
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.claim_expiry().num_seconds(), 300);
    }
}
