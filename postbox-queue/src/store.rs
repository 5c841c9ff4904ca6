use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    ArchiveRecord, MessageId, MessageRecord, RecordPatch, Result, record::select_due,
};

/// Durable collection of pending message records.
///
/// Implementations only need to provide storage primitives; the due query
/// and its ordering are shared so every backend selects the same records.
#[async_trait]
pub trait QueueStore: Send + Sync + Debug {
    /// Stores a new record and returns its id.
    async fn insert(&self, record: MessageRecord) -> Result<MessageId>;

    async fn get(&self, id: &MessageId) -> Result<MessageRecord>;

    /// Every record, due or not, in id (creation) order.
    async fn all(&self) -> Result<Vec<MessageRecord>>;

    /// Applies a field level update to a record.
    async fn patch(&self, id: &MessageId, patch: &RecordPatch) -> Result<()>;

    async fn delete(&self, id: &MessageId) -> Result<()>;

    /// Due records ordered by `last_attempt_at` (never attempted first),
    /// optionally capped at `limit`.
    async fn due(&self, now: DateTime<Utc>, limit: Option<usize>) -> Result<Vec<MessageRecord>> {
        Ok(select_due(self.all().await?, now, limit))
    }

    async fn count_due(&self, now: DateTime<Utc>) -> Result<usize> {
        Ok(self.all().await?.iter().filter(|r| r.is_due(now)).count())
    }
}

/// Append-only destination for terminal records (archive, dead-letter).
#[async_trait]
pub trait RecordSink: Send + Sync + Debug {
    async fn append(&self, record: ArchiveRecord) -> Result<()>;
}
