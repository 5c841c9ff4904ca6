//! SMTP relay settings, both the application default and per-message
//! overrides.
//!
//! Grouping messages by the relay they are sent through relies on the
//! structural equality of [`EffectiveSettings`]: every field takes part,
//! including where the settings came from. Two overrides that are textually
//! identical share a group; an override that merely happens to equal the
//! default does not join the default group.

use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{TlsFlags, TlsMode, VerifyMode};

/// SASL mechanism used to authenticate against the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMechanism {
    #[default]
    Plain,
    Login,
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => f.write_str("PLAIN"),
            Self::Login => f.write_str("LOGIN"),
        }
    }
}

/// Connection settings for one mail relay.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SmtpSettings {
    /// Relay host name or address
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Name announced in EHLO/HELO
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Authentication is only attempted when a user name is present
    #[serde(default)]
    pub user_name: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub authentication: AuthMechanism,

    #[serde(default)]
    pub tls: TlsFlags,

    #[serde(default)]
    pub verify: VerifyMode,

    /// PEM trust anchors used instead of the system store when verifying
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
}

const fn default_port() -> u16 {
    25
}

fn default_domain() -> String {
    "localhost.localdomain".to_string()
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: default_port(),
            domain: default_domain(),
            user_name: None,
            password: None,
            authentication: AuthMechanism::default(),
            tls: TlsFlags::default(),
            verify: VerifyMode::default(),
            ca_file: None,
        }
    }
}

// Passwords must never reach the logs.
impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("domain", &self.domain)
            .field("user_name", &self.user_name)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("authentication", &self.authentication)
            .field("tls", &self.tls)
            .field("verify", &self.verify)
            .field("ca_file", &self.ca_file)
            .finish()
    }
}

impl SmtpSettings {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// `host:port` for display, with IPv6 literals bracketed.
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    #[must_use]
    pub fn tls_mode(&self) -> TlsMode {
        self.tls.mode()
    }

    /// Returns the credentials when authentication should be attempted.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.user_name
            .as_deref()
            .map(|user| (user, self.password.as_deref().unwrap_or_default()))
    }
}

/// Where the settings of a group came from.
///
/// Remediation differs between the two: a broken override can be dropped so
/// the message falls back to the default, a broken default is an application
/// misconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsSource {
    Default,
    Override,
}

impl fmt::Display for SettingsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Override => f.write_str("override"),
        }
    }
}

/// Settings a message is actually sent with, tagged with their source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EffectiveSettings {
    pub source: SettingsSource,
    pub settings: SmtpSettings,
}

impl EffectiveSettings {
    #[must_use]
    pub const fn from_default(settings: SmtpSettings) -> Self {
        Self {
            source: SettingsSource::Default,
            settings,
        }
    }

    #[must_use]
    pub const fn from_override(settings: SmtpSettings) -> Self {
        Self {
            source: SettingsSource::Override,
            settings,
        }
    }

    #[must_use]
    pub const fn is_override(&self) -> bool {
        matches!(self.source, SettingsSource::Override)
    }
}

impl fmt::Display for EffectiveSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} via {}:{} ({})",
            self.settings.domain,
            self.settings.user_name.as_deref().unwrap_or("-"),
            self.settings.host,
            self.settings.port,
            self.source
        )
    }
}
