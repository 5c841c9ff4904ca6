//! Connection level configuration.
//!
//! - [`timeouts`]: open and read deadlines for relay sessions
//! - [`tls`]: TLS mode selection and certificate verification

pub mod timeouts;
pub mod tls;

pub use timeouts::SessionTimeouts;
pub use tls::{TlsFlags, TlsMode, VerifyMode};
