//! One delivery run over the queue.
//!
//! A run walks through [`RunState`]s: the due batch is fetched (after the
//! max-age purge), exhausted records are dead-lettered and the rest grouped
//! by relay settings, then each group gets one relay session. Failures are
//! classified and persisted as they happen. A failure while opening a
//! session never stops the next group; only a fatal error in the middle of
//! a transaction ends the run.

use std::fmt;

use chrono::{DateTime, Utc};
use postbox_common::{EffectiveSettings, Signal, internal, tracing};
use postbox_queue::{
    ArchiveRecord, MessageRecord, QueueError, RecordPatch, Stores, purge_expired,
};
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::{
    DeliveryConfig, DeliveryError, EngineError, RunReport,
    classifier::{self, Remediation, Scope},
    grouper::{Group, group_by_settings},
    session::SmtpSession,
};

/// Phase of a delivery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Fetching,
    Grouping,
    Connecting,
    Sending,
    Classifying,
    Draining,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Grouping => "grouping",
            Self::Connecting => "connecting",
            Self::Sending => "sending",
            Self::Classifying => "classifying",
            Self::Draining => "draining",
            Self::Done => "done",
        })
    }
}

/// Drains due records from the queue to their relays.
#[derive(Debug)]
pub struct DeliveryEngine {
    config: DeliveryConfig,
    stores: Stores,
    shutdown: Option<broadcast::Receiver<Signal>>,
    stopping: bool,
    state: RunState,
}

impl DeliveryEngine {
    #[must_use]
    pub const fn new(config: DeliveryConfig, stores: Stores) -> Self {
        Self {
            config,
            stores,
            shutdown: None,
            stopping: false,
            state: RunState::Idle,
        }
    }

    /// Stops runs at the next group boundary once [`Signal::Shutdown`] is
    /// received.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<Signal>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    #[must_use]
    pub const fn stores(&self) -> &Stores {
        &self.stores
    }

    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, state: RunState) {
        internal!("Delivery run: {} -> {}", self.state, state);
        self.state = state;
    }

    fn shutdown_requested(&mut self) -> bool {
        if !self.stopping
            && let Some(receiver) = self.shutdown.as_mut()
            && matches!(
                receiver.try_recv(),
                Ok(Signal::Shutdown) | Err(TryRecvError::Lagged(_))
            )
        {
            self.stopping = true;
        }

        self.stopping
    }

    /// Runs one delivery pass at the current time.
    ///
    /// # Errors
    ///
    /// Fails when the queue store fails or a fatal delivery error occurs.
    /// Everything persisted before the failure stays persisted.
    pub async fn run(&mut self) -> Result<RunReport, EngineError> {
        self.run_at(Utc::now()).await
    }

    /// Runs one delivery pass as if the current time were `now`.
    ///
    /// # Errors
    ///
    /// See [`Self::run`].
    #[tracing::instrument(skip(self), fields(relay = %self.config.smtp.address()))]
    pub async fn run_at(&mut self, now: DateTime<Utc>) -> Result<RunReport, EngineError> {
        let mut report = RunReport::default();
        let result = self.execute(now, &mut report).await;
        self.transition(RunState::Done);

        result.map(|()| {
            internal!(level = INFO, "Delivery run finished: {report}");
            report
        })
    }

    async fn execute(
        &mut self,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<(), EngineError> {
        self.transition(RunState::Fetching);

        if let Some(max_age) = self.config.max_age() {
            let cutoff = now
                .checked_sub_signed(max_age)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            report.purged = purge_expired(self.stores.queue.as_ref(), cutoff).await?;
        }

        report.total_due = self.stores.queue.count_due(now).await?;
        let batch = self
            .stores
            .queue
            .due(now, self.config.batch_size)
            .await?;
        report.selected = batch.len();

        if batch.is_empty() {
            internal!(level = INFO, "No messages to be sent");
            return Ok(());
        }

        internal!(
            level = INFO,
            "Starting batch sending process, sending {} / {} mails",
            report.selected,
            report.total_due
        );

        self.transition(RunState::Grouping);

        let mut live = Vec::with_capacity(batch.len());
        for record in batch {
            if self.config.retry.exceeds_ceiling(record.failed_attempts) {
                self.dead_letter(&record, now).await?;
                report.dead_lettered += 1;
            } else {
                live.push(record);
            }
        }

        let groups = group_by_settings(live, &self.config.smtp);
        internal!(level = DEBUG, "Batch split into {} relay group(s)", groups.len());

        for group in groups {
            if self.shutdown_requested() {
                tracing::warn!("Shutdown requested, leaving the remaining groups queued");
                report.interrupted = true;
                break;
            }

            report.groups += 1;
            self.deliver_group(&group, now, report).await?;
        }

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(relay = %group.settings, records = group.len()))]
    async fn deliver_group(
        &mut self,
        group: &Group,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<(), EngineError> {
        self.transition(RunState::Connecting);

        let mut session = match SmtpSession::open(&group.settings, self.config.timeouts).await {
            Ok(session) => session,
            Err(error) => {
                self.transition(RunState::Classifying);
                return self
                    .remediate(
                        &error,
                        Scope::Connection,
                        &group.settings,
                        &group.records,
                        now,
                        report,
                    )
                    .await;
            }
        };

        self.transition(RunState::Sending);
        let outcome = self.send_all(&mut session, group, now, report).await;

        self.transition(RunState::Draining);
        session.quit().await;

        outcome
    }

    async fn send_all(
        &mut self,
        session: &mut SmtpSession,
        group: &Group,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<(), EngineError> {
        for (position, record) in group.records.iter().enumerate() {
            if !session.is_alive() {
                let remaining = group.len() - position;
                tracing::warn!(
                    relay = %group.settings,
                    "Session closed, leaving {remaining} record(s) for the next run"
                );
                report.untouched += remaining;
                break;
            }

            match session.send(record).await {
                Ok(()) => {
                    self.archive(record, &group.settings, now).await?;
                    report.sent += 1;
                }
                Err(error) => {
                    self.transition(RunState::Classifying);
                    self.remediate(
                        &error,
                        Scope::Message,
                        &group.settings,
                        std::slice::from_ref(record),
                        now,
                        report,
                    )
                    .await?;

                    session.reset().await;
                    self.transition(RunState::Sending);
                }
            }
        }

        Ok(())
    }

    /// Applies the classifier's decision for `error` to `records`.
    async fn remediate(
        &self,
        error: &DeliveryError,
        scope: Scope,
        settings: &EffectiveSettings,
        records: &[MessageRecord],
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<(), EngineError> {
        let remediation = classifier::remediate(error, scope, settings, records);

        match remediation {
            Remediation::Abort => {
                tracing::error!(relay = %settings, error = %error, "Aborting delivery run");
                return Err(EngineError::Fatal {
                    settings: settings.to_string(),
                    error: error.clone(),
                });
            }
            Remediation::Held => {
                tracing::error!(
                    relay = %settings,
                    error = %error,
                    "Unable to set up the session, {} record(s) left queued for the next run",
                    records.len()
                );
            }
            Remediation::Misconfigured => {
                tracing::error!(
                    relay = %settings,
                    error = %error,
                    "Default SMTP settings are misconfigured, {} record(s) left queued",
                    records.len()
                );
            }
            _ => {
                tracing::warn!(
                    relay = %settings,
                    kind = %error.kind(),
                    ?scope,
                    ?remediation,
                    "Delivery failed: {error}"
                );
            }
        }

        for record in records {
            if let Some(patch) = remediation.patch(record, error, &self.config.retry, now) {
                self.persist(record, &patch, now).await?;
            }

            match remediation {
                Remediation::StripOverride => report.overrides_stripped += 1,
                Remediation::FailedAttempt | Remediation::Reschedule => report.deferred += 1,
                Remediation::Untouched | Remediation::Misconfigured | Remediation::Held => {
                    report.untouched += 1;
                }
                Remediation::Abort => {}
            }
        }

        Ok(())
    }

    async fn persist(
        &self,
        record: &MessageRecord,
        patch: &RecordPatch,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        match self.stores.queue.patch(&record.id, patch).await {
            Ok(()) => {
                tracing::debug!(
                    message_id = %record.id,
                    attempt = patch.failed_attempts.unwrap_or(record.failed_attempts),
                    "Record updated at {now}"
                );
                Ok(())
            }
            Err(QueueError::NotFound(id)) => {
                tracing::warn!(message_id = %id, "Record vanished before it could be updated");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn archive(
        &self,
        record: &MessageRecord,
        settings: &EffectiveSettings,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.stores
            .archive
            .append(ArchiveRecord::from_record(record, now))
            .await?;
        self.stores.queue.delete(&record.id).await?;

        tracing::info!(
            message_id = %record.id,
            host = %settings.settings.host,
            port = settings.settings.port,
            source = %settings.source,
            "Mail sent to {}",
            record.recipient
        );

        Ok(())
    }

    async fn dead_letter(
        &self,
        record: &MessageRecord,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.stores
            .dead_letter
            .append(ArchiveRecord::from_record(record, now))
            .await?;
        self.stores.queue.delete(&record.id).await?;

        tracing::warn!(
            message_id = %record.id,
            attempt = record.failed_attempts,
            "Dead-lettered mail to {} after {} failed attempts",
            record.recipient,
            record.failed_attempts
        );

        Ok(())
    }
}
