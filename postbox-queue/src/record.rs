//! Queue, archive and dead-letter records.
//!
//! A [`MessageRecord`] lives in the queue from enqueue until it is handed off
//! to a relay (archived), exhausts its retry budget (dead-lettered) or ages
//! out. The delivery engine never edits records directly; it describes the
//! change as a [`RecordPatch`] and lets the store apply it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use postbox_common::SmtpSettings;
use serde::{Deserialize, Serialize};

use crate::MessageId;

/// One pending delivery: one sender, one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub sender: String,
    pub recipient: String,

    /// Fully encoded message, headers included.
    pub body: String,

    /// Not eligible for delivery before this instant.
    pub not_before: Option<DateTime<Utc>>,

    /// Most recent failed attempt, possibly pushed into the future by backoff.
    /// `None` means never attempted.
    pub last_attempt_at: Option<DateTime<Utc>>,

    pub failed_attempts: u32,

    /// Failure description keyed by attempt number.
    pub fail_reasons: BTreeMap<u32, String>,

    /// Relay settings that replace the application default for this message.
    pub smtp_override: Option<SmtpSettings>,

    /// Free-form application data carried through to the archive.
    pub attributes: BTreeMap<String, String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageRecord {
    #[must_use]
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            sender: sender.into(),
            recipient: recipient.into(),
            body: body.into(),
            not_before: None,
            last_attempt_at: None,
            failed_attempts: 0,
            fail_reasons: BTreeMap::new(),
            smtp_override: None,
            attributes: BTreeMap::new(),
            created_at,
            updated_at: created_at,
        }
    }

    /// A record is due when it has no `not_before`, or it has passed (inclusive).
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_none_or(|not_before| not_before <= now)
    }

    /// Body size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

/// Terminal copy of a record, written to the archive on hand-off or to the
/// dead-letter store on exhaustion. Carries no queue identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub sender: String,
    pub recipient: String,
    pub body: String,
    pub not_before: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub failed_attempts: u32,
    pub fail_reasons: BTreeMap<u32, String>,
    pub smtp_override: Option<SmtpSettings>,
    pub attributes: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}

impl ArchiveRecord {
    #[must_use]
    pub fn from_record(record: &MessageRecord, archived_at: DateTime<Utc>) -> Self {
        Self {
            sender: record.sender.clone(),
            recipient: record.recipient.clone(),
            body: record.body.clone(),
            not_before: record.not_before,
            last_attempt_at: record.last_attempt_at,
            failed_attempts: record.failed_attempts,
            fail_reasons: record.fail_reasons.clone(),
            smtp_override: record.smtp_override.clone(),
            attributes: record.attributes.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            archived_at,
        }
    }
}

/// Field level update of a queued record.
///
/// Counters and timestamps only ever move forward: a patch carrying an older
/// `last_attempt_at` or a lower `failed_attempts` leaves the stored value as
/// it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub failed_attempts: Option<u32>,
    pub fail_reason: Option<(u32, String)>,
    pub strip_override: bool,
}

impl RecordPatch {
    /// Drops the per-message override so the default settings apply.
    #[must_use]
    pub fn strip_override() -> Self {
        Self {
            strip_override: true,
            ..Self::default()
        }
    }

    /// Reschedules without counting a failure.
    #[must_use]
    pub fn reschedule(at: DateTime<Utc>) -> Self {
        Self {
            last_attempt_at: Some(at),
            ..Self::default()
        }
    }

    /// Records failed attempt number `attempt` and reschedules.
    #[must_use]
    pub fn failed_attempt(attempt: u32, reason: impl Into<String>, retry_at: DateTime<Utc>) -> Self {
        Self {
            last_attempt_at: Some(retry_at),
            failed_attempts: Some(attempt),
            fail_reason: Some((attempt, reason.into())),
            strip_override: false,
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.last_attempt_at.is_none()
            && self.failed_attempts.is_none()
            && self.fail_reason.is_none()
            && !self.strip_override
    }

    pub fn apply(&self, record: &mut MessageRecord, now: DateTime<Utc>) {
        if let Some(at) = self.last_attempt_at {
            record.last_attempt_at = Some(record.last_attempt_at.map_or(at, |prev| prev.max(at)));
        }

        if let Some(attempts) = self.failed_attempts {
            record.failed_attempts = record.failed_attempts.max(attempts);
        }

        if let Some((attempt, reason)) = &self.fail_reason {
            record.fail_reasons.insert(*attempt, reason.clone());
        }

        if self.strip_override {
            record.smtp_override = None;
        }

        record.updated_at = now;
    }
}

/// Selects the due records, ordered for delivery.
///
/// Never-attempted records come first, then ascending `last_attempt_at`; ties
/// fall back to id (creation) order. At most `limit` records are returned.
#[must_use]
pub fn select_due(
    records: impl IntoIterator<Item = MessageRecord>,
    now: DateTime<Utc>,
    limit: Option<usize>,
) -> Vec<MessageRecord> {
    let mut due: Vec<_> = records.into_iter().filter(|r| r.is_due(now)).collect();
    due.sort_by(|a, b| {
        a.last_attempt_at
            .cmp(&b.last_attempt_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    if let Some(limit) = limit {
        due.truncate(limit);
    }

    due
}
