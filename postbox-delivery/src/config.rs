use chrono::TimeDelta;
use postbox_common::{SessionTimeouts, SmtpSettings};
use serde::{Deserialize, Serialize};

use crate::policy::RetryPolicy;

/// Configuration of one delivery run.
///
/// ```ron
/// delivery: (
///     smtp: (host: "smtp.example.com", port: 587, tls: (enable_starttls_auto: true)),
///     batch_size: Some(100),
///     max_age_secs: 604800,
///     retry: (ceiling: 6),
///     timeouts: (open_secs: 30, read_secs: 60),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Relay used by every record without an override
    #[serde(default)]
    pub smtp: SmtpSettings,

    /// Upper bound on records selected per run. `None` selects every due
    /// record.
    #[serde(default)]
    pub batch_size: Option<usize>,

    /// Records older than this are purged before a run. Zero disables
    /// purging.
    ///
    /// Default: 604800 seconds (7 days)
    #[serde(default = "defaults::max_age_secs")]
    pub max_age_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub timeouts: SessionTimeouts,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            smtp: SmtpSettings::default(),
            batch_size: None,
            max_age_secs: defaults::max_age_secs(),
            retry: RetryPolicy::default(),
            timeouts: SessionTimeouts::default(),
        }
    }
}

impl DeliveryConfig {
    /// Maximum record age, or `None` when purging is disabled.
    #[must_use]
    pub fn max_age(&self) -> Option<TimeDelta> {
        if self.max_age_secs == 0 {
            return None;
        }

        i64::try_from(self.max_age_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
    }
}

mod defaults {
    pub const fn max_age_secs() -> u64 {
        7 * 24 * 60 * 60
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let config: DeliveryConfig = ron::from_str("()").unwrap();
        assert_eq!(config, DeliveryConfig::default());
        assert_eq!(config.max_age(), Some(TimeDelta::days(7)));
        assert_eq!(config.retry.ceiling, 6);
        assert_eq!(config.batch_size, None);
    }

    #[test]
    fn test_full_config() {
        let config: DeliveryConfig = ron::from_str(
            r#"(
                smtp: (host: "smtp.example.com", port: 587, tls: (enable_starttls_auto: true)),
                batch_size: Some(100),
                max_age_secs: 0,
                retry: (ceiling: 3),
                timeouts: (open_secs: 5),
            )"#,
        )
        .unwrap();

        assert_eq!(config.smtp.host, "smtp.example.com");
        assert_eq!(config.smtp.port, 587);
        assert_eq!(config.batch_size, Some(100));
        assert_eq!(config.max_age(), None);
        assert_eq!(config.retry.ceiling, 3);
        assert_eq!(config.timeouts.open_secs, 5);
        assert_eq!(config.timeouts.read_secs, 60);
    }
}
