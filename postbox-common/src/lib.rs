//! Types shared by every postbox crate: SMTP settings, TLS rules, timeouts,
//! and the logging setup.

pub mod config;
pub mod logging;
pub mod settings;

pub use config::{SessionTimeouts, TlsFlags, TlsMode, VerifyMode};
pub use settings::{AuthMechanism, EffectiveSettings, SettingsSource, SmtpSettings};
pub use tracing;

/// Control signal broadcast to long running tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
