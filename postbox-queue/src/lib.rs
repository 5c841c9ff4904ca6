//! Durable storage for outbound mail.
//!
//! The queue holds one [`MessageRecord`] per sender/recipient pair until it is
//! handed off, dead-lettered or purged. Terminal copies go to append-only
//! [`RecordSink`]s (archive and dead-letter).

pub mod backends;
pub mod config;
pub mod enqueue;
pub mod error;
pub mod purge;
pub mod record;
pub mod store;
pub mod types;

pub use backends::{FileQueueStore, FileRecordSink, MemoryQueueStore, MemoryRecordSink};
pub use config::{StoreConfig, Stores};
pub use enqueue::{EnqueueOptions, OutgoingMessage, enqueue};
pub use error::{QueueError, Result, SerializationError, ValidationError};
pub use purge::purge_expired;
pub use record::{ArchiveRecord, MessageRecord, RecordPatch, select_due};
pub use store::{QueueStore, RecordSink};
pub use types::MessageId;
