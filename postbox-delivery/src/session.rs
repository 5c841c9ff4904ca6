//! One relay session: open, send any number of records, close.

use postbox_common::{EffectiveSettings, SessionTimeouts, TlsMode, internal, tracing};
use postbox_queue::MessageRecord;
use postbox_smtp::{ClientError, Response, SmtpClient};

use crate::DeliveryError;

/// An open, greeted and (if configured) authenticated relay session.
#[derive(Debug)]
pub struct SmtpSession {
    client: SmtpClient,
    settings: EffectiveSettings,
    alive: bool,
}

/// EHLO, falling back to HELO when the relay rejects EHLO permanently.
async fn hello(client: &mut SmtpClient, domain: &str) -> Result<Response, ClientError> {
    let response = client.ehlo(domain).await?;

    if response.is_permanent_error() {
        internal!(
            level = DEBUG,
            "EHLO rejected with {}, falling back to HELO",
            response.code
        );
        return client.helo(domain).await?.ensure_positive();
    }

    response.ensure_positive()
}

impl SmtpSession {
    /// Connects, reads the greeting, negotiates TLS and authenticates.
    ///
    /// # Errors
    ///
    /// Any failure is returned already classified. A rejected AUTH exchange
    /// is [`DeliveryError::Authentication`], a relay that cannot provide the
    /// required STARTTLS is [`DeliveryError::Transport`].
    #[tracing::instrument(skip_all, fields(relay = %settings))]
    pub async fn open(
        settings: &EffectiveSettings,
        timeouts: SessionTimeouts,
    ) -> Result<Self, DeliveryError> {
        let smtp = &settings.settings;

        if smtp.tls_mode().uses_tls() && smtp.verify.accepts_invalid_certs() {
            tracing::warn!(
                relay = %settings,
                "SECURITY WARNING: TLS certificate validation is disabled for this relay"
            );
        }

        let mut client = SmtpClient::connect(smtp, timeouts).await?;
        client.read_greeting().await?.ensure_positive()?;

        let mut capabilities = hello(&mut client, &smtp.domain).await?;

        match smtp.tls_mode() {
            TlsMode::StartTlsAuto if capabilities.has_extension("STARTTLS") => {
                let response = client.starttls().await?;
                if response.is_success() {
                    capabilities = hello(&mut client, &smtp.domain).await?;
                } else {
                    tracing::warn!(
                        relay = %settings,
                        "STARTTLS refused with {} {}, continuing without TLS",
                        response.code,
                        response.message()
                    );
                }
            }
            TlsMode::StartTlsRequired => {
                if !capabilities.has_extension("STARTTLS") {
                    return Err(DeliveryError::Transport(
                        "STARTTLS is required but not advertised by the relay".to_string(),
                    ));
                }

                let response = client.starttls().await?;
                if !response.is_success() {
                    return Err(DeliveryError::Transport(format!(
                        "STARTTLS is required but was refused: {} {}",
                        response.code,
                        response.message()
                    )));
                }
                capabilities = hello(&mut client, &smtp.domain).await?;
            }
            TlsMode::StartTlsAuto | TlsMode::Implicit | TlsMode::Disabled => {}
        }

        if let Some((user, password)) = smtp.credentials() {
            let response = client
                .authenticate(smtp.authentication, user, password)
                .await?;

            if !response.is_success() {
                return Err(DeliveryError::Authentication(format!(
                    "{} {}",
                    response.code,
                    response.message()
                )));
            }
        }

        internal!(
            level = DEBUG,
            "Session open via {settings} (tls: {}, extensions: {})",
            client.is_tls(),
            capabilities.lines.len().saturating_sub(1)
        );

        Ok(Self {
            client,
            settings: settings.clone(),
            alive: true,
        })
    }

    #[must_use]
    pub const fn settings(&self) -> &EffectiveSettings {
        &self.settings
    }

    /// Returns `false` once the connection can no longer carry commands.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.alive
    }

    /// Runs one mail transaction for `record`.
    ///
    /// # Errors
    ///
    /// Returns the classified failure. Transport level failures also mark
    /// the session dead.
    #[tracing::instrument(skip_all, fields(id = %record.id, recipient = %record.recipient))]
    pub async fn send(&mut self, record: &MessageRecord) -> Result<(), DeliveryError> {
        if !self.alive {
            return Err(DeliveryError::Protocol(
                ClientError::ConnectionClosed.to_string(),
            ));
        }

        let result = self.transaction(record).await;

        if let Err(err) = &result
            && err.is_connection_fatal()
        {
            self.alive = false;
        }

        result.map_err(DeliveryError::from)
    }

    async fn transaction(&mut self, record: &MessageRecord) -> Result<(), ClientError> {
        let response = self.client.mail_from(&record.sender).await?;
        if !response.is_success() {
            return Err(response.into_error());
        }

        let response = self.client.rcpt_to(&record.recipient).await?;
        if !response.is_success() {
            return Err(response.into_error());
        }

        let response = self.client.data().await?;
        if !response.is_intermediate() {
            return Err(response.into_error());
        }

        let response = self.client.send_data(&record.body).await?;
        if !response.is_success() {
            return Err(response.into_error());
        }

        Ok(())
    }

    /// Clears a failed transaction so the next record can be sent.
    pub async fn reset(&mut self) {
        if !self.alive {
            return;
        }

        match self.client.rset().await {
            Ok(response) if response.is_success() => {}
            Ok(response) => {
                tracing::warn!(
                    relay = %self.settings,
                    "RSET rejected with {} {}, closing session",
                    response.code,
                    response.message()
                );
                self.alive = false;
            }
            Err(err) => {
                tracing::warn!(relay = %self.settings, "RSET failed: {err}");
                self.alive = false;
            }
        }
    }

    /// Sends QUIT. Failures are logged; records already handed off stay
    /// handed off.
    pub async fn quit(mut self) {
        if !self.alive {
            return;
        }

        if let Err(err) = self.client.quit().await {
            tracing::warn!(relay = %self.settings, "QUIT failed: {err}");
        }
    }
}
