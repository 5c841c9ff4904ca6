use std::{path::PathBuf, time::Duration};

use postbox_common::{
    AuthMechanism, SessionTimeouts, SmtpSettings, TlsMode, VerifyMode, incoming, outgoing,
};
use tokio::net::TcpStream;

use super::{
    auth,
    connection::ClientConnection,
    data::dot_stuff,
    error::{ClientError, Result},
    response::Response,
};

/// Initial size of the read buffer for SMTP replies.
const BUFFER_SIZE: usize = 8192;

/// Upper bound for the read buffer (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

async fn open_connection(settings: &SmtpSettings) -> Result<ClientConnection> {
    let stream = TcpStream::connect((settings.host.as_str(), settings.port)).await?;
    let connection = ClientConnection::Plain(stream);

    if settings.tls_mode() == TlsMode::Implicit {
        connection
            .upgrade_to_tls(&settings.host, settings.verify, settings.ca_file.as_deref())
            .await
    } else {
        Ok(connection)
    }
}

/// A client session with one relay.
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    host: String,
    verify: VerifyMode,
    ca_file: Option<PathBuf>,
    read_timeout: Duration,
}

impl std::fmt::Debug for SmtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpClient")
            .field("host", &self.host)
            .field("connected", &self.connection.is_some())
            .field("tls", &self.is_tls())
            .finish_non_exhaustive()
    }
}

impl SmtpClient {
    /// Opens a connection to the relay described by `settings`.
    ///
    /// With [`TlsMode::Implicit`] the TLS handshake is part of opening the
    /// connection, so both happen under the open deadline.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or handshake fails or the open
    /// deadline elapses.
    pub async fn connect(settings: &SmtpSettings, timeouts: SessionTimeouts) -> Result<Self> {
        let connection = tokio::time::timeout(timeouts.open(), open_connection(settings))
            .await
            .map_err(|_| ClientError::Timeout {
                operation: "connect",
                after: timeouts.open(),
            })??;

        Ok(Self {
            connection: Some(connection),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            host: settings.host.clone(),
            verify: settings.verify,
            ca_file: settings.ca_file.clone(),
            read_timeout: timeouts.read(),
        })
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.connection.as_ref().is_some_and(ClientConnection::is_tls)
    }

    /// Reads the relay greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the greeting is malformed.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;
        connection.send(format!("{line}\r\n").as_bytes()).await?;
        connection.flush().await
    }

    /// Sends a command and reads the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        outgoing!("{command}");
        self.send_line(command).await?;
        self.read_response().await
    }

    /// Like [`Self::command`], but the line is never logged.
    async fn secret_command(&mut self, command: &str, label: &str) -> Result<Response> {
        outgoing!("{label} <redacted>");
        self.send_line(command).await?;
        self.read_response().await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn helo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("HELO {domain}")).await
    }

    /// Authenticates with the given mechanism.
    ///
    /// Returns the final reply of the exchange; a relay that rejects an
    /// intermediate step has that rejection returned instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails at the transport level.
    pub async fn authenticate(
        &mut self,
        mechanism: AuthMechanism,
        user: &str,
        password: &str,
    ) -> Result<Response> {
        match mechanism {
            AuthMechanism::Plain => {
                let payload = auth::plain_payload(user, password);
                self.secret_command(&format!("AUTH PLAIN {payload}"), "AUTH PLAIN")
                    .await
            }
            AuthMechanism::Login => {
                let response = self.command("AUTH LOGIN").await?;
                if !response.is_intermediate() {
                    return Ok(response);
                }

                let response = self
                    .secret_command(&auth::login_payload(user), "AUTH LOGIN user")
                    .await?;
                if !response.is_intermediate() {
                    return Ok(response);
                }

                self.secret_command(&auth::login_payload(password), "AUTH LOGIN password")
                    .await
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Sends the message body, dot-stuffed, followed by the end-of-data marker.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails.
    pub async fn send_data(&mut self, body: &str) -> Result<Response> {
        let payload = dot_stuff(body);
        outgoing!("<{} bytes of message data>", payload.len());

        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;
        connection.send(payload.as_bytes()).await?;
        connection.send(b".\r\n").await?;
        connection.flush().await?;

        self.read_response().await
    }

    /// Sends STARTTLS and, on a positive reply, upgrades the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or the TLS handshake fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?;

        if response.is_success() {
            let connection = self
                .connection
                .take()
                .ok_or(ClientError::ConnectionClosed)?;

            // Anything buffered before the handshake came in plaintext.
            self.buffer_pos = 0;

            let upgrade =
                connection.upgrade_to_tls(&self.host, self.verify, self.ca_file.as_deref());
            let upgraded = tokio::time::timeout(self.read_timeout, upgrade)
                .await
                .map_err(|_| ClientError::Timeout {
                    operation: "TLS handshake",
                    after: self.read_timeout,
                })??;
            self.connection = Some(upgraded);
        }

        Ok(response)
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn rset(&mut self) -> Result<Response> {
        self.command("RSET").await
    }

    /// Sends QUIT and drops the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn quit(&mut self) -> Result<Response> {
        let response = self.command("QUIT").await;
        self.connection = None;
        response
    }

    /// Reads one complete reply under the read deadline.
    async fn read_response(&mut self) -> Result<Response> {
        let deadline = self.read_timeout;
        let response = tokio::time::timeout(deadline, self.read_response_inner())
            .await
            .map_err(|_| ClientError::Timeout {
                operation: "reply",
                after: deadline,
            })??;

        incoming!("{} {}", response.code, response.message());
        Ok(response)
    }

    async fn read_response_inner(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}
