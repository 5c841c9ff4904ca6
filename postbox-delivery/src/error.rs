//! Failure taxonomy for delivery.
//!
//! Every failure raised while talking to a relay is folded into one of five
//! kinds. The kind alone decides remediation, see [`crate::classifier`].

use std::fmt;

use postbox_queue::QueueError;
use postbox_smtp::ClientError;
use thiserror::Error;

/// A failure raised during a relay session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Transient 4xx condition reported by the relay
    #[error("Relay busy: {0}")]
    Busy(String),

    /// Syntax or permanent reply, unexpected reply, timeout or dropped
    /// connection
    #[error("Protocol failure: {0}")]
    Protocol(String),

    /// The relay rejected the configured credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// TLS could not be established as configured
    #[error("Transport failure: {0}")]
    Transport(String),

    /// A fault in the local environment; continuing the run is pointless
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Discriminant of [`DeliveryError`], used in logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Busy,
    Protocol,
    Authentication,
    Transport,
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Busy => "busy",
            Self::Protocol => "protocol",
            Self::Authentication => "authentication",
            Self::Transport => "transport",
            Self::Fatal => "fatal",
        })
    }
}

impl DeliveryError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Busy(_) => ErrorKind::Busy,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Returns `true` for failures caused by the settings themselves rather
    /// than by the relay's state.
    #[must_use]
    pub const fn is_settings_fault(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::Transport(_))
    }
}

impl From<ClientError> for DeliveryError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::SmtpError { code, message } if (400..500).contains(&code) => {
                Self::Busy(format!("{code} {message}"))
            }
            ClientError::SmtpError { code, message } => {
                Self::Protocol(format!("{code} {message}"))
            }
            ClientError::TlsError(e) => Self::Transport(e),
            ClientError::Environment(e) => Self::Fatal(e),
            ClientError::Io(_)
            | ClientError::ParseError(_)
            | ClientError::ConnectionClosed
            | ClientError::Timeout { .. }
            | ClientError::Utf8Error(_) => Self::Protocol(err.to_string()),
        }
    }
}

/// Errors that end a delivery run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Queue store error: {0}")]
    Store(#[from] QueueError),

    #[error("Delivery through {settings} aborted: {error}")]
    Fatal {
        settings: String,
        error: DeliveryError,
    },
}
