use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;

use crate::{
    FileQueueStore, FileRecordSink, MemoryQueueStore, MemoryRecordSink, QueueStore, RecordSink,
    Result, ValidationError,
};

/// Storage backend for the queue, archive and dead-letter stores.
///
/// File-backed storage in RON config:
/// ```ron
/// Postbox (
///     store: File(
///         path: "/var/spool/postbox",
///     ),
/// )
/// ```
///
/// Memory-backed storage for testing:
/// ```ron
/// Postbox (
///     store: Memory,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum StoreConfig {
    /// Root directory of the file backend. The queue, archive and
    /// dead-letter stores live in `queue/`, `archive/` and `dead_letter/`
    /// below it.
    File {
        #[serde(deserialize_with = "validated_path")]
        path: PathBuf,
    },
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::File {
            path: PathBuf::from("/var/spool/postbox"),
        }
    }
}

impl StoreConfig {
    /// # Errors
    ///
    /// Rejects relative paths, `..` components and system directories.
    pub fn file(path: impl Into<PathBuf>) -> std::result::Result<Self, ValidationError> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Self::File { path })
    }

    /// Root directory of a file backend.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File { path } => Some(path),
            Self::Memory => None,
        }
    }
}

// Paths are validated while the configuration is read.
fn validated_path<'de, D>(deserializer: D) -> std::result::Result<PathBuf, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let path = PathBuf::deserialize(deserializer)?;
    validate_path(&path).map_err(serde::de::Error::custom)?;
    Ok(path)
}

const SYSTEM_PREFIXES: [&str; 9] = [
    "/etc",
    "/bin",
    "/sbin",
    "/usr/bin",
    "/usr/sbin",
    "/boot",
    "/sys",
    "/proc",
    "/dev",
];

fn validate_path(path: &Path) -> std::result::Result<(), ValidationError> {
    let display = || path.display().to_string();

    if path.components().any(|c| c == Component::ParentDir) {
        return Err(ValidationError::ParentComponent(display()));
    }

    if !path.is_absolute() {
        return Err(ValidationError::NotAbsolute(display()));
    }

    if let Some(prefix) = SYSTEM_PREFIXES.iter().find(|p| path.starts_with(p)) {
        return Err(ValidationError::SystemDirectory {
            prefix: *prefix,
            path: display(),
        });
    }

    Ok(())
}

/// The three stores the delivery engine works against.
#[derive(Debug, Clone)]
pub struct Stores {
    pub queue: Arc<dyn QueueStore>,
    pub archive: Arc<dyn RecordSink>,
    pub dead_letter: Arc<dyn RecordSink>,
}

impl Stores {
    #[must_use]
    pub fn memory() -> Self {
        Self {
            queue: Arc::new(MemoryQueueStore::new()),
            archive: Arc::new(MemoryRecordSink::new()),
            dead_letter: Arc::new(MemoryRecordSink::new()),
        }
    }
}

impl StoreConfig {
    /// Opens the configured stores, creating directories as needed.
    ///
    /// # Errors
    ///
    /// Fails if a file store directory cannot be prepared.
    pub fn open(&self) -> Result<Stores> {
        match self {
            Self::Memory => Ok(Stores::memory()),
            Self::File { path: root } => {
                Ok(Stores {
                    queue: Arc::new(FileQueueStore::open(root.join("queue"))?),
                    archive: Arc::new(FileRecordSink::open(root.join("archive"))?),
                    dead_letter: Arc::new(FileRecordSink::open(root.join("dead_letter"))?),
                })
            }
        }
    }
}
