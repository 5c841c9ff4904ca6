//! Producer side: turning an outgoing message into queue records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mailparse::{MailAddr, MailHeaderMap, MailParseError, addrparse_header};
use postbox_common::{SmtpSettings, internal};

use crate::{MessageId, MessageRecord, QueueError, QueueStore, Result};

/// A fully encoded message with its envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub sender: String,
    pub destinations: Vec<String>,
    pub body: String,
}

/// Scheduling and routing options applied to every record of a message.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub not_before: Option<DateTime<Utc>>,
    pub smtp_override: Option<SmtpSettings>,
    pub attributes: BTreeMap<String, String>,
}

fn invalid(err: &MailParseError) -> QueueError {
    QueueError::InvalidMessage(err.to_string())
}

fn addresses(headers: &[mailparse::MailHeader<'_>], name: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();

    for header in headers.get_all_headers(name) {
        for addr in addrparse_header(header).map_err(|e| invalid(&e))?.iter() {
            match addr {
                MailAddr::Single(info) => out.push(info.addr.clone()),
                MailAddr::Group(group) => out.extend(group.addrs.iter().map(|a| a.addr.clone())),
            }
        }
    }

    Ok(out)
}

impl OutgoingMessage {
    /// Reads the envelope from an RFC 5322 message.
    ///
    /// The sender is the `Return-Path` if present, otherwise the first `From`
    /// address. Destinations are every `To`, `Cc` and `Bcc` address. The body
    /// is kept exactly as given.
    ///
    /// # Errors
    ///
    /// Fails when the message is not UTF-8, headers cannot be parsed, or no
    /// sender or destination can be found.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let body = std::str::from_utf8(raw)
            .map_err(|e| QueueError::InvalidMessage(format!("Message is not UTF-8: {e}")))?
            .to_string();
        let (headers, _) = mailparse::parse_headers(raw).map_err(|e| invalid(&e))?;

        let return_path = headers
            .get_first_value("Return-Path")
            .map(|v| v.trim().trim_start_matches('<').trim_end_matches('>').to_string())
            .filter(|v| !v.is_empty());

        let sender = match return_path {
            Some(sender) => sender,
            None => addresses(&headers, "From")?
                .into_iter()
                .next()
                .ok_or_else(|| QueueError::InvalidMessage("Message has no sender".to_string()))?,
        };

        let mut destinations = Vec::new();
        for name in ["To", "Cc", "Bcc"] {
            destinations.extend(addresses(&headers, name)?);
        }

        if destinations.is_empty() {
            return Err(QueueError::InvalidMessage(
                "Message has no recipients".to_string(),
            ));
        }

        Ok(Self {
            sender,
            destinations,
            body,
        })
    }
}

/// Writes one record per destination.
///
/// # Errors
///
/// Fails on the first record the store rejects; records written before it
/// stay queued.
pub async fn enqueue(
    store: &dyn QueueStore,
    message: &OutgoingMessage,
    options: &EnqueueOptions,
) -> Result<Vec<MessageId>> {
    let now = Utc::now();
    let mut ids = Vec::with_capacity(message.destinations.len());

    for destination in &message.destinations {
        let mut record = MessageRecord::new(&message.sender, destination, &message.body, now);
        record.not_before = options.not_before;
        record.smtp_override.clone_from(&options.smtp_override);
        record.attributes.clone_from(&options.attributes);

        ids.push(store.insert(record).await?);
    }

    internal!(
        level = INFO,
        "Queued {} message(s) from {}",
        ids.len(),
        message.sender
    );

    Ok(ids)
}
