//! SASL payloads for AUTH PLAIN and AUTH LOGIN (RFC 4616, RFC 4954).

use base64::{Engine, engine::general_purpose::STANDARD};

/// `base64("\0user\0password")`
pub(super) fn plain_payload(user: &str, password: &str) -> String {
    STANDARD.encode(format!("\0{user}\0{password}"))
}

pub(super) fn login_payload(value: &str) -> String {
    STANDARD.encode(value)
}
