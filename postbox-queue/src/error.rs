//! Error types for queue storage and enqueueing.

use std::io;

use thiserror::Error;

use crate::MessageId;

/// Top-level queue error type.
#[derive(Debug, Error)]
pub enum QueueError {
    /// I/O operation failed (file read/write/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Message not found: {0}")]
    NotFound(MessageId),

    /// Queue directory validation failed.
    #[error("Queue validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Message already exists: {0}")]
    AlreadyExists(MessageId),

    /// A message handed to the producer could not be turned into records.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Queue directory validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Queue path is not a directory: {0}")]
    NotDirectory(String),

    #[error("Queue path must be absolute: {0}")]
    NotAbsolute(String),

    #[error("Queue path cannot contain '..' components: {0}")]
    ParentComponent(String),

    #[error("Queue path cannot be in system directory {prefix}: {path}")]
    SystemDirectory { prefix: &'static str, path: String },
}

/// Specialized `Result` type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

impl<T> From<std::sync::PoisonError<T>> for QueueError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

impl From<bincode::error::EncodeError> for QueueError {
    fn from(e: bincode::error::EncodeError) -> Self {
        Self::Serialization(e.into())
    }
}

impl From<bincode::error::DecodeError> for QueueError {
    fn from(e: bincode::error::DecodeError) -> Self {
        Self::Serialization(e.into())
    }
}
