//! TLS configuration for relay sessions.
//!
//! Settings record TLS intent as three independent flags, the way mailer
//! settings are usually written by applications. Several flags may be set at
//! once, so the effective [`TlsMode`] is chosen by walking [`TLS_RULES`] in
//! order and taking the first rule whose flag is set.

use serde::{Deserialize, Serialize};

/// TLS negotiation mode for a relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Upgrade via STARTTLS when the relay advertises it, plaintext otherwise.
    StartTlsAuto,

    /// Upgrade via STARTTLS; the session fails when the relay lacks support.
    StartTlsRequired,

    /// TLS from the first byte (SMTPS).
    Implicit,

    /// Plaintext, TLS explicitly disabled.
    Disabled,
}

impl TlsMode {
    /// Returns `true` if any TLS is negotiated in this mode.
    #[must_use]
    pub const fn uses_tls(self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// Certificate verification applied whenever TLS is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    /// Validate the relay certificate chain and host name.
    #[default]
    Verify,

    /// Accept any certificate (relays with self-signed certificates).
    ///
    /// **SECURITY WARNING**: this makes the session vulnerable to
    /// man-in-the-middle attacks.
    None,
}

impl VerifyMode {
    #[must_use]
    pub const fn accepts_invalid_certs(self) -> bool {
        matches!(self, Self::None)
    }
}

/// TLS intent as recorded in SMTP settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct TlsFlags {
    #[serde(default)]
    pub enable_starttls_auto: bool,

    #[serde(default)]
    pub enable_starttls: bool,

    #[serde(default)]
    pub tls: bool,
}

/// Ordered TLS selection rules, highest priority first.
pub const TLS_RULES: [(fn(&TlsFlags) -> bool, TlsMode); 3] = [
    (wants_starttls_auto, TlsMode::StartTlsAuto),
    (wants_starttls, TlsMode::StartTlsRequired),
    (wants_implicit_tls, TlsMode::Implicit),
];

const fn wants_starttls_auto(flags: &TlsFlags) -> bool {
    flags.enable_starttls_auto
}

const fn wants_starttls(flags: &TlsFlags) -> bool {
    flags.enable_starttls
}

const fn wants_implicit_tls(flags: &TlsFlags) -> bool {
    flags.tls
}

impl TlsFlags {
    /// Selects the effective mode: first matching rule, else [`TlsMode::Disabled`].
    #[must_use]
    pub fn mode(&self) -> TlsMode {
        TLS_RULES
            .iter()
            .find(|(matches, _)| matches(self))
            .map_or(TlsMode::Disabled, |(_, mode)| *mode)
    }

    #[must_use]
    pub const fn starttls_auto() -> Self {
        Self {
            enable_starttls_auto: true,
            enable_starttls: false,
            tls: false,
        }
    }

    #[must_use]
    pub const fn starttls_required() -> Self {
        Self {
            enable_starttls_auto: false,
            enable_starttls: true,
            tls: false,
        }
    }

    #[must_use]
    pub const fn implicit() -> Self {
        Self {
            enable_starttls_auto: false,
            enable_starttls: false,
            tls: true,
        }
    }

    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enable_starttls_auto: false,
            enable_starttls: false,
            tls: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flags_is_disabled() {
        assert_eq!(TlsFlags::default().mode(), TlsMode::Disabled);
        assert!(!TlsMode::Disabled.uses_tls());
    }

    #[test]
    fn test_single_flags() {
        assert_eq!(TlsFlags::starttls_auto().mode(), TlsMode::StartTlsAuto);
        assert_eq!(
            TlsFlags::starttls_required().mode(),
            TlsMode::StartTlsRequired
        );
        assert_eq!(TlsFlags::implicit().mode(), TlsMode::Implicit);
    }

    #[test]
    fn test_auto_wins_over_everything() {
        let flags = TlsFlags {
            enable_starttls_auto: true,
            enable_starttls: true,
            tls: true,
        };
        assert_eq!(flags.mode(), TlsMode::StartTlsAuto);
    }

    #[test]
    fn test_forced_starttls_wins_over_implicit() {
        let flags = TlsFlags {
            enable_starttls_auto: false,
            enable_starttls: true,
            tls: true,
        };
        assert_eq!(flags.mode(), TlsMode::StartTlsRequired);
    }

    #[test]
    fn test_verify_mode_default() {
        assert_eq!(VerifyMode::default(), VerifyMode::Verify);
        assert!(!VerifyMode::Verify.accepts_invalid_certs());
        assert!(VerifyMode::None.accepts_invalid_certs());
    }

    #[test]
    fn test_verify_mode_from_config() {
        let mode: VerifyMode = ron::from_str("none").unwrap();
        assert_eq!(mode, VerifyMode::None);
    }
}
