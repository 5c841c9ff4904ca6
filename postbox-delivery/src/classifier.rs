//! Remediation of delivery failures.
//!
//! Deciding what a failure means is pure: [`remediate`] maps the error, the
//! scope it occurred in and the settings source to a [`Remediation`], which
//! then yields one [`RecordPatch`] per affected record. Only the engine
//! touches the store.
//!
//! | failure                | default settings         | override settings                        |
//! |------------------------|--------------------------|------------------------------------------|
//! | busy                   | untouched                | untouched                                |
//! | authentication/transport | misconfiguration, untouched | override stripped                   |
//! | protocol (message)     | failed attempt           | failed attempt                           |
//! | protocol (connection)  | rescheduled              | stripped if every record failed before, else failed attempt |
//! | fatal (connection)     | held, reported           | held, reported                           |
//! | fatal (message)        | run aborted              | run aborted                              |

use chrono::{DateTime, Utc};
use postbox_common::EffectiveSettings;
use postbox_queue::{MessageRecord, RecordPatch};

use crate::{DeliveryError, policy::RetryPolicy};

/// Where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// While opening the session; affects the whole group
    Connection,
    /// During one record's transaction
    Message,
}

/// What to do with the records affected by a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// Leave the records exactly as they are.
    Untouched,

    /// The default settings are broken; records are left alone and the
    /// problem is reported.
    Misconfigured,

    /// The session could not be set up for a reason outside the settings
    /// and the relay; records are left alone, later groups still run.
    Held,

    /// Drop the override so the next run uses the default settings.
    StripOverride,

    /// Count a failed attempt and back off.
    FailedAttempt,

    /// Back off without counting an attempt.
    Reschedule,

    /// Stop the run.
    Abort,
}

/// Decides the remediation for `error`.
///
/// `records` are the records affected: the whole group for
/// [`Scope::Connection`], the single record for [`Scope::Message`].
#[must_use]
pub fn remediate(
    error: &DeliveryError,
    scope: Scope,
    settings: &EffectiveSettings,
    records: &[MessageRecord],
) -> Remediation {
    if error.is_settings_fault() {
        return if settings.is_override() {
            Remediation::StripOverride
        } else {
            Remediation::Misconfigured
        };
    }

    match (error, scope) {
        (DeliveryError::Busy(_), _) => Remediation::Untouched,
        (DeliveryError::Fatal(_), Scope::Connection) => Remediation::Held,
        (DeliveryError::Fatal(_), Scope::Message) => Remediation::Abort,
        (_, Scope::Message) => Remediation::FailedAttempt,
        (_, Scope::Connection) if !settings.is_override() => Remediation::Reschedule,
        // An unreachable override gets one strike before it is dropped.
        (_, Scope::Connection) if records.iter().all(|r| r.failed_attempts > 0) => {
            Remediation::StripOverride
        }
        (_, Scope::Connection) => Remediation::FailedAttempt,
    }
}

impl Remediation {
    /// The store update this remediation makes to `record`, if any.
    #[must_use]
    pub fn patch(
        self,
        record: &MessageRecord,
        error: &DeliveryError,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Option<RecordPatch> {
        let next_attempt = record.failed_attempts.saturating_add(1);

        match self {
            Self::Untouched | Self::Misconfigured | Self::Held | Self::Abort => None,
            Self::StripOverride => Some(RecordPatch::strip_override()),
            Self::FailedAttempt => Some(RecordPatch::failed_attempt(
                next_attempt,
                error.to_string(),
                policy.backoff(now, next_attempt),
            )),
            Self::Reschedule => Some(RecordPatch::reschedule(
                policy.backoff(now, next_attempt),
            )),
        }
    }
}
