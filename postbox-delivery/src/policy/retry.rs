//! Retry policy for failed deliveries.
//!
//! A record that failed `k` times is not retried before
//! `last_attempt_at + k^4` minutes, and is dead-lettered once `k` exceeds the
//! ceiling.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Highest failure count that is still retried. A record whose
    /// `failed_attempts` exceeds this is dead-lettered without being sent.
    ///
    /// Default: 6
    #[serde(default = "defaults::ceiling")]
    pub ceiling: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            ceiling: defaults::ceiling(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(ceiling: u32) -> Self {
        Self { ceiling }
    }

    #[must_use]
    pub const fn exceeds_ceiling(&self, failed_attempts: u32) -> bool {
        failed_attempts > self.ceiling
    }

    /// Delay before a record that failed `attempt` times may be retried.
    #[must_use]
    pub fn delay(attempt: u32) -> TimeDelta {
        i64::try_from(u64::from(attempt).saturating_pow(4))
            .ok()
            .and_then(TimeDelta::try_minutes)
            .unwrap_or(TimeDelta::MAX)
    }

    /// Earliest retry time for a record that failed `attempt` times, counted
    /// from `now`.
    #[must_use]
    pub fn backoff(&self, now: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
        now.checked_add_signed(Self::delay(attempt))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

mod defaults {
    pub const fn ceiling() -> u32 {
        6
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.ceiling, 6);
        assert!(!policy.exceeds_ceiling(6));
        assert!(policy.exceeds_ceiling(7));
    }

    #[test]
    fn test_delay_is_fourth_power_in_minutes() {
        assert_eq!(RetryPolicy::delay(0), TimeDelta::zero());
        assert_eq!(RetryPolicy::delay(1), TimeDelta::minutes(1));
        assert_eq!(RetryPolicy::delay(2), TimeDelta::minutes(16));
        assert_eq!(RetryPolicy::delay(3), TimeDelta::minutes(81));
        assert_eq!(RetryPolicy::delay(6), TimeDelta::minutes(1296));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        assert_eq!(policy.backoff(now, 2), now + TimeDelta::minutes(16));
        assert_eq!(policy.backoff(now, u32::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_deserialize_partial() {
        let policy: RetryPolicy = ron::from_str("()").unwrap();
        assert_eq!(policy, RetryPolicy::default());

        let policy: RetryPolicy = ron::from_str("(ceiling: 3)").unwrap();
        assert_eq!(policy.ceiling, 3);
    }
}
