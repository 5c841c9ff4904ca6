//! Deadlines applied to every network operation of a relay session.
//!
//! No operation may block indefinitely: the open deadline bounds TCP connect
//! plus any implicit TLS handshake, the read deadline bounds the wait for each
//! reply from the relay.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Open/read deadlines for an SMTP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTimeouts {
    /// Timeout for establishing the connection.
    ///
    /// Default: 60 seconds
    #[serde(default = "defaults::open_secs")]
    pub open_secs: u64,

    /// Timeout for each reply read from the relay.
    ///
    /// Default: 60 seconds
    #[serde(default = "defaults::read_secs")]
    pub read_secs: u64,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            open_secs: defaults::open_secs(),
            read_secs: defaults::read_secs(),
        }
    }
}

impl SessionTimeouts {
    #[must_use]
    pub const fn open(&self) -> Duration {
        Duration::from_secs(self.open_secs)
    }

    #[must_use]
    pub const fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }
}

mod defaults {
    pub const fn open_secs() -> u64 {
        60
    }

    pub const fn read_secs() -> u64 {
        60
    }
}
