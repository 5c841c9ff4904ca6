//! SMTP client for handing messages to an upstream relay.
//!
//! The client speaks the submission side of the protocol only:
//!
//! - plain TCP or implicit TLS connections, bounded by an open deadline
//! - STARTTLS upgrade with optional certificate verification
//! - AUTH PLAIN and AUTH LOGIN
//! - MAIL FROM, RCPT TO, DATA (with dot-stuffing), RSET and QUIT
//!
//! Every reply is read under the configured read deadline, so no call can
//! block indefinitely.
//!
//! ```no_run
//! use postbox_common::{SessionTimeouts, SmtpSettings};
//! use postbox_smtp::SmtpClient;
//!
//! # async fn example() -> Result<(), postbox_smtp::ClientError> {
//! let settings = SmtpSettings::new("relay.example.com", 25);
//! let mut client = SmtpClient::connect(&settings, SessionTimeouts::default()).await?;
//!
//! client.read_greeting().await?.ensure_positive()?;
//! client.ehlo("app.example.com").await?.ensure_positive()?;
//! client.mail_from("app@example.com").await?.ensure_positive()?;
//! client.rcpt_to("user@example.net").await?.ensure_positive()?;
//! client.data().await?.ensure_positive()?;
//! client.send_data("Subject: hi\r\n\r\nhello").await?.ensure_positive()?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod auth;
mod connection;
mod data;
mod error;
mod response;
mod smtp_client;

pub use data::dot_stuff;
pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
pub use smtp_client::SmtpClient;
