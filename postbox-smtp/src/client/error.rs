//! Error types for the SMTP client.

use std::{io, time::Duration};

use thiserror::Error;

/// Errors that can occur when talking to a relay.
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error occurred during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Failed to parse an SMTP response from the server.
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// The server answered with a non-positive reply.
    #[error("SMTP error: {code} - {message}")]
    SmtpError { code: u16, message: String },

    /// TLS could not be established or the peer was not trusted.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// The local environment cannot support the requested session.
    #[error("Client environment error: {0}")]
    Environment(String),

    /// Connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// A deadline elapsed.
    #[error("Timed out after {after:?} waiting for {operation}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

impl ClientError {
    /// Returns `true` if the connection can no longer be used after this error.
    #[must_use]
    pub const fn is_connection_fatal(&self) -> bool {
        !matches!(self, Self::SmtpError { .. })
    }
}

/// Specialized `Result` type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_replies_keep_connection() {
        let reply = ClientError::SmtpError {
            code: 550,
            message: "No such user".to_string(),
        };
        assert!(!reply.is_connection_fatal());
        assert!(ClientError::ConnectionClosed.is_connection_fatal());
        assert!(
            ClientError::Timeout {
                operation: "reply",
                after: Duration::from_secs(1)
            }
            .is_connection_fatal()
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = ClientError::Timeout {
            operation: "connect",
            after: Duration::from_secs(60),
        };
        assert_eq!(err.to_string(), "Timed out after 60s waiting for connect");
    }
}
