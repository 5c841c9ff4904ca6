use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    ArchiveRecord, MessageId, MessageRecord, QueueError, QueueStore, RecordPatch, RecordSink,
};

/// In-memory queue.
///
/// Records are kept in a `BTreeMap` behind an `RwLock`, so listing is in id
/// order for free. Intended for tests and transient deployments; the
/// optional capacity makes inserts fail once reached.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueueStore {
    records: Arc<RwLock<BTreeMap<MessageId, MessageRecord>>>,
    capacity: Option<usize>,
}

impl MemoryQueueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Recovers gracefully if the lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert(&self, record: MessageRecord) -> crate::Result<MessageId> {
        let mut records = self.records.write()?;

        if records.contains_key(&record.id) {
            return Err(QueueError::AlreadyExists(record.id));
        }

        if let Some(cap) = self.capacity
            && records.len() >= cap
        {
            return Err(QueueError::Internal(format!(
                "Memory queue capacity exceeded: {}/{cap} messages",
                records.len()
            )));
        }

        let id = record.id;
        records.insert(id, record);
        Ok(id)
    }

    async fn get(&self, id: &MessageId) -> crate::Result<MessageRecord> {
        self.records
            .read()?
            .get(id)
            .cloned()
            .ok_or(QueueError::NotFound(*id))
    }

    async fn all(&self) -> crate::Result<Vec<MessageRecord>> {
        Ok(self.records.read()?.values().cloned().collect())
    }

    async fn patch(&self, id: &MessageId, patch: &RecordPatch) -> crate::Result<()> {
        let mut records = self.records.write()?;
        let record = records.get_mut(id).ok_or(QueueError::NotFound(*id))?;
        patch.apply(record, Utc::now());
        Ok(())
    }

    async fn delete(&self, id: &MessageId) -> crate::Result<()> {
        self.records
            .write()?
            .remove(id)
            .ok_or(QueueError::NotFound(*id))?;
        Ok(())
    }
}

/// In-memory archive or dead-letter store.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordSink {
    records: Arc<RwLock<Vec<ArchiveRecord>>>,
}

impl MemoryRecordSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far.
    #[must_use]
    pub fn records(&self) -> Vec<ArchiveRecord> {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordSink for MemoryRecordSink {
    async fn append(&self, record: ArchiveRecord) -> crate::Result<()> {
        self.records.write()?.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    use super::*;

    fn record(recipient: &str) -> MessageRecord {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        MessageRecord::new("app@example.com", recipient, "body", created)
    }

    #[tokio::test]
    async fn test_memory_store_basic_operations() {
        let store = MemoryQueueStore::new();
        let id = store.insert(record("a@example.com")).await.unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);

        let read = store.get(&id).await.unwrap();
        assert_eq!(read.recipient, "a@example.com");

        store.delete(&id).await.unwrap();
        assert!(store.is_empty());
        assert!(matches!(
            store.get(&id).await,
            Err(QueueError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = MemoryQueueStore::new();
        let r = record("a@example.com");
        store.insert(r.clone()).await.unwrap();

        assert!(matches!(
            store.insert(r).await,
            Err(QueueError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let store = MemoryQueueStore::with_capacity(1);
        store.insert(record("a@example.com")).await.unwrap();

        assert!(matches!(
            store.insert(record("b@example.com")).await,
            Err(QueueError::Internal(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_patch_and_due() {
        let store = MemoryQueueStore::new();
        let now = Utc::now();
        let retried = store.insert(record("retried@example.com")).await.unwrap();
        let fresh = store.insert(record("fresh@example.com")).await.unwrap();

        store
            .patch(
                &retried,
                &RecordPatch::failed_attempt(1, "451 try later", now - Duration::minutes(1)),
            )
            .await
            .unwrap();

        let due: Vec<_> = store
            .due(now, None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(due, vec![fresh, retried]);
        assert_eq!(store.count_due(now).await.unwrap(), 2);

        let patched = store.get(&retried).await.unwrap();
        assert_eq!(patched.failed_attempts, 1);
        assert_eq!(patched.fail_reasons.get(&1).map(String::as_str), Some("451 try later"));
    }

    #[tokio::test]
    async fn test_patch_missing_record() {
        let store = MemoryQueueStore::new();
        let result = store
            .patch(&MessageId::generate(), &RecordPatch::strip_override())
            .await;
        assert!(matches!(result, Err(QueueError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_sink_appends() {
        let sink = MemoryRecordSink::new();
        let r = record("a@example.com");
        sink.append(ArchiveRecord::from_record(&r, Utc::now()))
            .await
            .unwrap();

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.records()[0].recipient, "a@example.com");
    }
}
