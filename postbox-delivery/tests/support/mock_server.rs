//! Mock SMTP relay for delivery tests
//!
//! The relay listens on a random local port and can:
#![allow(dead_code)] // Test utility module - not all methods used in every test
//! - Answer every command with a configured reply
//! - Reject selected recipients
//! - Advertise STARTTLS and AUTH and run the AUTH exchanges
//! - Speak TLS with a generated self-signed certificate, either from the
//!   first byte or after STARTTLS
//! - Hang on a command or before the greeting to trigger timeouts
//! - Record every command and message body it receives
//!
//! # Example
//!
//! ```rust,no_run
//! use support::mock_server::MockSmtpServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MockSmtpServer::builder()
//!     .with_rcpt_to_response_for("unknown@example.net", 550, "User unknown")
//!     .build()
//!     .await?;
//!
//! // Point the SMTP settings at server.addr()
//!
//! server.shutdown();
//! # Ok(())
//! # }
//! ```

use std::{
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpListener,
    sync::RwLock,
    time::timeout,
};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    },
};

trait RelayStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> RelayStream for T {}

type Connection = BufReader<Box<dyn RelayStream>>;

/// Self-signed certificate and key for the relay's TLS endpoint
#[derive(Clone)]
pub struct RelayIdentity {
    cert: CertificateDer<'static>,
    key: Vec<u8>,
    pem: String,
}

impl RelayIdentity {
    /// Certificate for `127.0.0.1` and `localhost`
    ///
    /// # Panics
    ///
    /// Panics if certificate generation fails
    #[must_use]
    pub fn generate() -> Self {
        let certified = rcgen::generate_simple_self_signed(vec![
            "127.0.0.1".to_string(),
            "localhost".to_string(),
        ])
        .unwrap();

        Self {
            cert: certified.cert.der().clone(),
            key: certified.key_pair.serialize_der(),
            pem: certified.cert.pem(),
        }
    }

    /// The certificate in PEM form, for use as a trust anchor file
    #[must_use]
    pub fn pem(&self) -> &str {
        &self.pem
    }

    fn acceptor(&self) -> TlsAcceptor {
        let key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(self.key.clone()));
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![self.cert.clone()], key)
            .unwrap();
        TlsAcceptor::from(Arc::new(config))
    }
}

/// SMTP command received by the mock relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    /// AUTH with its mechanism; payloads are not recorded
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message content as received, still dot-stuffed
    MessageContent(String),
    Rset,
    StartTls,
    Quit,
    Other(String),
}

/// Reply configuration for a command
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    pub code: u16,
    pub message: String,
}

impl SmtpResponse {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct EhloResponse {
    code: u16,
    capabilities: Vec<String>,
}

impl EhloResponse {
    fn to_bytes(&self) -> Vec<u8> {
        let mut response = String::new();
        let last = self.capabilities.len().saturating_sub(1);

        for (i, cap) in self.capabilities.iter().enumerate() {
            let separator = if i < last { '-' } else { ' ' };
            let _ = write!(&mut response, "{}{separator}{cap}\r\n", self.code);
        }

        response.into_bytes()
    }
}

#[derive(Clone)]
struct MockServerConfig {
    greeting: SmtpResponse,
    ehlo_response: EhloResponse,
    helo_response: SmtpResponse,
    auth_response: SmtpResponse,
    mail_from_response: SmtpResponse,
    rcpt_to_response: SmtpResponse,
    rcpt_to_overrides: Vec<(String, SmtpResponse)>,
    data_response: SmtpResponse,
    data_end_response: SmtpResponse,
    rset_response: SmtpResponse,
    quit_response: SmtpResponse,
    starttls_response: Option<SmtpResponse>,

    identity: Option<RelayIdentity>,
    implicit_tls: bool,

    // Failure injection
    greeting_delay: Option<Duration>,
    timeout_on_command: Option<String>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: SmtpResponse::new(220, "Mock SMTP Relay"),
            ehlo_response: EhloResponse {
                code: 250,
                capabilities: vec!["mock.relay".to_string(), "SIZE 10000000".to_string()],
            },
            helo_response: SmtpResponse::new(250, "Hello"),
            auth_response: SmtpResponse::new(235, "Authentication successful"),
            mail_from_response: SmtpResponse::new(250, "OK"),
            rcpt_to_response: SmtpResponse::new(250, "OK"),
            rcpt_to_overrides: Vec::new(),
            data_response: SmtpResponse::new(354, "End data with <CR><LF>.<CR><LF>"),
            data_end_response: SmtpResponse::new(250, "OK: queued"),
            rset_response: SmtpResponse::new(250, "OK"),
            quit_response: SmtpResponse::new(221, "Bye"),
            starttls_response: None,
            identity: None,
            implicit_tls: false,
            greeting_delay: None,
            timeout_on_command: None,
        }
    }
}

/// Mock SMTP relay
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands_received: Arc<RwLock<Vec<SmtpCommand>>>,
    connections: Arc<AtomicUsize>,
    tls_handshakes: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder::new()
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// All commands received so far, across connections
    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands_received.read().await.clone()
    }

    /// Recipients of every accepted RCPT TO, in order
    pub async fn recipients(&self) -> Vec<String> {
        self.commands()
            .await
            .into_iter()
            .filter_map(|c| match c {
                SmtpCommand::RcptTo(to) => Some(to),
                _ => None,
            })
            .collect()
    }

    /// Bodies of every message received, in order
    pub async fn messages(&self) -> Vec<String> {
        self.commands()
            .await
            .into_iter()
            .filter_map(|c| match c {
                SmtpCommand::MessageContent(body) => Some(body),
                _ => None,
            })
            .collect()
    }

    /// Number of accepted connections
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Number of completed TLS handshakes, implicit or after STARTTLS
    #[must_use]
    pub fn tls_handshakes(&self) -> usize {
        self.tls_handshakes.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn command_word(line: &str) -> String {
        line.split_whitespace()
            .next()
            .unwrap_or_default()
            .to_uppercase()
    }

    fn argument(line: &str) -> String {
        line.split_once(' ')
            .map(|(_, rest)| rest.to_string())
            .unwrap_or_default()
    }

    fn address(argument: &str) -> String {
        argument
            .split_once(':')
            .map_or(argument, |(_, addr)| addr)
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_string()
    }

    async fn accept_tls(
        stream: Box<dyn RelayStream>,
        identity: &RelayIdentity,
        tls_handshakes: &AtomicUsize,
    ) -> std::io::Result<Box<dyn RelayStream>> {
        let stream = identity.acceptor().accept(stream).await?;
        tls_handshakes.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(stream))
    }

    #[allow(clippy::too_many_lines)]
    async fn handle_client(
        stream: Box<dyn RelayStream>,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
        tls_handshakes: Arc<AtomicUsize>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let stream = match (&config.identity, config.implicit_tls) {
            (Some(identity), true) => Self::accept_tls(stream, identity, &tls_handshakes).await?,
            _ => stream,
        };

        if let Some(delay) = config.greeting_delay {
            tokio::time::sleep(delay).await;
        }

        let mut conn: Connection = BufReader::new(stream);
        let mut line = String::new();

        conn.write_all(&config.greeting.to_bytes()).await?;
        conn.flush().await?;

        loop {
            line.clear();

            let read_result = timeout(Duration::from_secs(10), conn.read_line(&mut line)).await;
            let Ok(bytes_read) = read_result else {
                return Ok(());
            };
            if bytes_read? == 0 {
                return Ok(());
            }

            let cmd_line = line.trim_end().to_string();
            let word = Self::command_word(&cmd_line);

            if config.timeout_on_command.as_deref() == Some(word.as_str()) {
                commands
                    .write()
                    .await
                    .push(SmtpCommand::Other(cmd_line.clone()));
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(());
            }

            let (response, smtp_cmd) = match word.as_str() {
                "EHLO" => (
                    config.ehlo_response.to_bytes(),
                    SmtpCommand::Ehlo(Self::argument(&cmd_line)),
                ),
                "HELO" => (
                    config.helo_response.to_bytes(),
                    SmtpCommand::Helo(Self::argument(&cmd_line)),
                ),
                "AUTH" => {
                    let argument = Self::argument(&cmd_line);
                    let mechanism = Self::command_word(&argument);
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::Auth(mechanism.clone()));

                    if mechanism == "LOGIN" {
                        for prompt in ["VXNlcm5hbWU6", "UGFzc3dvcmQ6"] {
                            conn.write_all(format!("334 {prompt}\r\n").as_bytes()).await?;
                            conn.flush().await?;
                            line.clear();
                            if conn.read_line(&mut line).await? == 0 {
                                return Ok(());
                            }
                        }
                    }

                    conn.write_all(&config.auth_response.to_bytes()).await?;
                    conn.flush().await?;
                    continue;
                }
                "MAIL" => (
                    config.mail_from_response.to_bytes(),
                    SmtpCommand::MailFrom(Self::address(&Self::argument(&cmd_line))),
                ),
                "RCPT" => {
                    let to = Self::address(&Self::argument(&cmd_line));
                    let response = config
                        .rcpt_to_overrides
                        .iter()
                        .find(|(recipient, _)| *recipient == to)
                        .map_or(&config.rcpt_to_response, |(_, response)| response);
                    (response.to_bytes(), SmtpCommand::RcptTo(to))
                }
                "DATA" => (config.data_response.to_bytes(), SmtpCommand::Data),
                "RSET" => (config.rset_response.to_bytes(), SmtpCommand::Rset),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    conn.write_all(&config.quit_response.to_bytes()).await?;
                    conn.flush().await?;
                    return Ok(());
                }
                "STARTTLS" => (
                    config
                        .starttls_response
                        .as_ref()
                        .map_or_else(
                            || SmtpResponse::new(502, "Command not implemented"),
                            Clone::clone,
                        )
                        .to_bytes(),
                    SmtpCommand::StartTls,
                ),
                _ => (
                    SmtpResponse::new(500, "Unknown command").to_bytes(),
                    SmtpCommand::Other(cmd_line.clone()),
                ),
            };

            commands.write().await.push(smtp_cmd.clone());

            if matches!(smtp_cmd, SmtpCommand::StartTls)
                && let Some(identity) = &config.identity
                && config
                    .starttls_response
                    .as_ref()
                    .is_some_and(|r| (200..300).contains(&r.code))
            {
                conn.write_all(&response).await?;
                conn.flush().await?;

                let stream = Self::accept_tls(conn.into_inner(), identity, &tls_handshakes).await?;
                conn = BufReader::new(stream);
                continue;
            }

            if matches!(smtp_cmd, SmtpCommand::Data) && config.data_response.code == 354 {
                conn.write_all(&response).await?;
                conn.flush().await?;

                let mut content = String::new();
                let mut data_line = String::new();

                loop {
                    data_line.clear();
                    if conn.read_line(&mut data_line).await? == 0 {
                        return Ok(());
                    }

                    if data_line == ".\r\n" || data_line == ".\n" {
                        commands
                            .write()
                            .await
                            .push(SmtpCommand::MessageContent(content.clone()));
                        conn
                            .write_all(&config.data_end_response.to_bytes())
                            .await?;
                        conn.flush().await?;
                        break;
                    }

                    content.push_str(&data_line);
                }
                continue;
            }

            conn.write_all(&response).await?;
            conn.flush().await?;
        }
    }
}

/// Builder for a [`MockSmtpServer`]
pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    fn new() -> Self {
        Self {
            config: MockServerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = SmtpResponse::new(code, message);
        self
    }

    /// EHLO reply; the first entry is the greeting line
    #[must_use]
    pub fn with_ehlo_response(mut self, code: u16, capabilities: Vec<String>) -> Self {
        self.config.ehlo_response = EhloResponse { code, capabilities };
        self
    }

    /// Adds an extension keyword to the EHLO reply
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.config.ehlo_response.capabilities.push(extension.into());
        self
    }

    #[must_use]
    pub fn with_helo_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.helo_response = SmtpResponse::new(code, message);
        self
    }

    /// Final reply to an AUTH exchange
    #[must_use]
    pub fn with_auth_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.auth_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to_response = SmtpResponse::new(code, message);
        self
    }

    /// RCPT TO reply for one recipient only
    #[must_use]
    pub fn with_rcpt_to_response_for(
        mut self,
        recipient: impl Into<String>,
        code: u16,
        message: impl Into<String>,
    ) -> Self {
        self.config
            .rcpt_to_overrides
            .push((recipient.into(), SmtpResponse::new(code, message)));
        self
    }

    #[must_use]
    pub fn with_data_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = SmtpResponse::new(code, message);
        self
    }

    /// Reply to STARTTLS; STARTTLS is also advertised in EHLO
    #[must_use]
    pub fn with_starttls_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.starttls_response = Some(SmtpResponse::new(code, message));
        self.config
            .ehlo_response
            .capabilities
            .push("STARTTLS".to_string());
        self
    }

    /// TLS identity used for STARTTLS upgrades and implicit TLS
    #[must_use]
    pub fn with_tls_identity(mut self, identity: RelayIdentity) -> Self {
        self.config.identity = Some(identity);
        self
    }

    /// Handshake before the greeting (SMTPS); requires a TLS identity
    #[must_use]
    pub const fn with_implicit_tls(mut self) -> Self {
        self.config.implicit_tls = true;
        self
    }

    /// Wait before sending the greeting
    #[must_use]
    pub const fn with_greeting_delay(mut self, delay: Duration) -> Self {
        self.config.greeting_delay = Some(delay);
        self
    }

    /// Never answer the given command (e.g. "MAIL")
    #[must_use]
    pub fn with_timeout_on_command(mut self, command: impl Into<String>) -> Self {
        self.config.timeout_on_command = Some(command.into().to_uppercase());
        self
    }

    /// Bind to a random local port and start serving
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound
    pub async fn build(self) -> Result<MockSmtpServer, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let tls_handshakes = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let commands_clone = Arc::clone(&commands);
        let connections_clone = Arc::clone(&connections);
        let tls_handshakes_clone = Arc::clone(&tls_handshakes);
        let shutdown_clone = Arc::clone(&shutdown);

        tokio::spawn(async move {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }

                let accept_result = timeout(Duration::from_millis(100), listener.accept()).await;

                if let Ok(Ok((stream, _peer))) = accept_result {
                    connections_clone.fetch_add(1, Ordering::Relaxed);
                    let config = Arc::clone(&config);
                    let commands = Arc::clone(&commands_clone);
                    let tls_handshakes = Arc::clone(&tls_handshakes_clone);

                    tokio::spawn(async move {
                        let stream: Box<dyn RelayStream> = Box::new(stream);
                        if let Err(e) =
                            MockSmtpServer::handle_client(stream, config, commands, tls_handshakes)
                                .await
                        {
                            tracing::debug!("Mock relay client error: {}", e);
                        }
                    });
                }
            }
        });

        Ok(MockSmtpServer {
            addr,
            commands_received: commands,
            connections,
            tls_handshakes,
            shutdown,
        })
    }
}
