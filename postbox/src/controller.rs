use std::{io::Write, sync::LazyLock, time::Duration};

use chrono::{DateTime, Utc};
use postbox_common::{Signal, internal, tracing};
use postbox_delivery::{DeliveryEngine, RunReport};
use postbox_queue::{EnqueueOptions, MessageId, OutgoingMessage, Stores, enqueue};
use tokio::{
    sync::broadcast,
    time::{MissedTickBehavior, interval},
};

use crate::{config::Postbox, mailq};

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Waits for SIGINT or SIGTERM and broadcasts [`Signal::Shutdown`].
///
/// # Errors
///
/// Fails if the signal handlers cannot be installed.
#[tracing::instrument(level = "trace")]
pub async fn shutdown_on_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

/// Owns the opened stores and runs the commands against them.
#[derive(Debug)]
pub struct Controller {
    config: Postbox,
    stores: Stores,
}

impl Controller {
    /// Opens the configured stores.
    ///
    /// # Errors
    ///
    /// Fails if a store cannot be opened.
    pub fn new(config: Postbox) -> anyhow::Result<Self> {
        let stores = config.store.open()?;
        Ok(Self { config, stores })
    }

    #[must_use]
    pub const fn stores(&self) -> &Stores {
        &self.stores
    }

    fn engine(&self, shutdown: &broadcast::Sender<Signal>) -> DeliveryEngine {
        DeliveryEngine::new(self.config.delivery.clone(), self.stores.clone())
            .with_shutdown(shutdown.subscribe())
    }

    /// One delivery run.
    ///
    /// # Errors
    ///
    /// Fails when the run ends with a store or fatal delivery error.
    pub async fn deliver(&self, shutdown: &broadcast::Sender<Signal>) -> anyhow::Result<RunReport> {
        Ok(self.engine(shutdown).run().await?)
    }

    /// Delivery runs every `period` until [`Signal::Shutdown`].
    ///
    /// A failed run is logged and the next one is attempted on schedule.
    ///
    /// # Errors
    ///
    /// Only fails if the shutdown channel closes unexpectedly.
    pub async fn serve(
        &self,
        period: Duration,
        shutdown: &broadcast::Sender<Signal>,
    ) -> anyhow::Result<()> {
        let mut engine = self.engine(shutdown);
        let mut receiver = shutdown.subscribe();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        internal!(level = INFO, "Serving, one delivery run every {period:?}");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match engine.run().await {
                        Ok(report) if report.interrupted => break,
                        Ok(_) => {}
                        Err(err) => tracing::error!("Delivery run failed: {err}"),
                    }
                }
                sig = receiver.recv() => {
                    match sig {
                        Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Lagged(_)) => break,
                        Err(broadcast::error::RecvError::Closed) => {
                            anyhow::bail!("Shutdown channel closed");
                        }
                    }
                }
            }
        }

        internal!(level = INFO, "Shutting down...");
        Ok(())
    }

    /// Writes the queue listing to `out`.
    ///
    /// # Errors
    ///
    /// Fails if the queue cannot be read or written out.
    pub async fn mailq(&self, out: &mut impl Write) -> anyhow::Result<()> {
        let records = self.stores.queue.all().await?;
        mailq::render(&records, out)?;
        Ok(())
    }

    /// Parses a raw message and queues one record per destination.
    ///
    /// # Errors
    ///
    /// Fails for a malformed message or a store failure.
    pub async fn enqueue(
        &self,
        raw: &[u8],
        not_before: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<MessageId>> {
        let message = OutgoingMessage::parse(raw)?;
        let options = EnqueueOptions {
            not_before,
            ..EnqueueOptions::default()
        };

        Ok(enqueue(self.stores.queue.as_ref(), &message, &options).await?)
    }
}
