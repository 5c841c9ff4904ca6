use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use postbox_common::{internal, tracing};
use serde::{Serialize, de::DeserializeOwned};
use tokio::fs;

use crate::{
    ArchiveRecord, MessageId, MessageRecord, QueueError, QueueStore, RecordPatch, RecordSink,
    Result, ValidationError,
};

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(
        value,
        bincode::config::standard(),
    )?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}

/// Writes `bytes` to `dir/name` by writing a temporary file and renaming it
/// into place, so readers never see a partial record.
async fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let temp = dir.join(format!(".tmp_{name}"));
    fs::write(&temp, bytes).await?;
    fs::rename(&temp, dir.join(name)).await?;
    Ok(())
}

/// Creates `path` if needed and removes leftovers of interrupted writes and
/// deletes (`.tmp_*`, `*.deleted`).
fn prepare_directory(path: &Path) -> Result<()> {
    if !path.try_exists()? {
        internal!("{} does not exist, creating...", path.display());
        std::fs::create_dir_all(path)?;
    } else if !path.is_dir() {
        return Err(ValidationError::NotDirectory(path.display().to_string()).into());
    }

    let mut cleaned = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let filename = entry.file_name();
        let filename = filename.to_string_lossy();

        if filename.ends_with(".deleted") || filename.starts_with(".tmp_") {
            std::fs::remove_file(entry.path())?;
            cleaned += 1;
        }
    }

    if cleaned > 0 {
        internal!(
            level = INFO,
            "Cleaned up {cleaned} orphaned files from {}",
            path.display()
        );
    }

    Ok(())
}

/// File-based queue.
///
/// Every record is one bincode file named after its id
/// (`{ulid}.bin`). Writes go through a temporary file and a rename; deletes
/// rename to `.deleted` before removing, and [`Self::open`] sweeps up after
/// any crash between the two phases.
#[derive(Debug, Clone)]
pub struct FileQueueStore {
    path: PathBuf,
}

impl FileQueueStore {
    /// Opens (creating if needed) the queue directory.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created or the path is not a directory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        internal!("Initialising queue at {}", path.display());
        prepare_directory(&path)?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record_path(&self, id: &MessageId) -> PathBuf {
        self.path.join(id.filename())
    }

    async fn read_record(&self, id: &MessageId) -> Result<MessageRecord> {
        match fs::read(self.record_path(id)).await {
            Ok(bytes) => decode(&bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(QueueError::NotFound(*id))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn ids(&self) -> Result<Vec<MessageId>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            if let Some(id) = MessageId::from_filename(&filename.to_string_lossy()) {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    #[tracing::instrument(level = "debug", skip(self, record), fields(id = %record.id))]
    async fn insert(&self, record: MessageRecord) -> Result<MessageId> {
        let id = record.id;
        if fs::try_exists(self.record_path(&id)).await? {
            return Err(QueueError::AlreadyExists(id));
        }

        write_atomic(&self.path, &id.filename(), &encode(&record)?).await?;
        internal!(level = DEBUG, "Queued message {id} for {}", record.recipient);

        Ok(id)
    }

    async fn get(&self, id: &MessageId) -> Result<MessageRecord> {
        self.read_record(id).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn all(&self) -> Result<Vec<MessageRecord>> {
        let ids = self.ids().await?;
        let mut records = Vec::with_capacity(ids.len());

        for id in ids {
            match self.read_record(&id).await {
                Ok(record) => records.push(record),
                // Deleted between listing and reading.
                Err(QueueError::NotFound(_)) => {}
                Err(QueueError::Serialization(err)) => {
                    tracing::warn!(%id, error = %err, "Skipping unreadable queue record");
                }
                Err(err) => return Err(err),
            }
        }

        internal!(level = DEBUG, "Found {} messages in queue", records.len());
        Ok(records)
    }

    #[tracing::instrument(level = "debug", skip(self, patch), fields(id = %id))]
    async fn patch(&self, id: &MessageId, patch: &RecordPatch) -> Result<()> {
        let mut record = self.read_record(id).await?;
        patch.apply(&mut record, Utc::now());
        write_atomic(&self.path, &id.filename(), &encode(&record)?).await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(id = %id))]
    async fn delete(&self, id: &MessageId) -> Result<()> {
        let path = self.record_path(id);
        let deleted = self.path.join(format!("{}.deleted", id.filename()));

        match fs::rename(&path, &deleted).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(QueueError::NotFound(*id));
            }
            Err(err) => return Err(err.into()),
        }

        // A leftover .deleted file is swept up on the next open.
        fs::remove_file(&deleted).await?;
        internal!(level = DEBUG, "Deleted message {id} from queue");

        Ok(())
    }
}

/// File-based archive or dead-letter store: one bincode file per record.
#[derive(Debug, Clone)]
pub struct FileRecordSink {
    path: PathBuf,
}

impl FileRecordSink {
    /// Opens (creating if needed) the sink directory.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created or the path is not a directory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        prepare_directory(&path)?;
        Ok(Self { path })
    }

    /// Reads every record appended so far, oldest first.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or undecodable files.
    pub async fn records(&self) -> Result<Vec<ArchiveRecord>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(id) = MessageId::from_filename(&entry.file_name().to_string_lossy()) {
                ids.push(id);
            }
        }
        ids.sort();

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            records.push(decode(&fs::read(self.path.join(id.filename())).await?)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl RecordSink for FileRecordSink {
    async fn append(&self, record: ArchiveRecord) -> Result<()> {
        let entry = MessageId::generate();
        write_atomic(&self.path, &entry.filename(), &encode(&record)?).await
    }
}
