use chrono::{DateTime, Utc};
use postbox_common::{internal, tracing};

use crate::{QueueError, QueueStore, Result};

/// Deletes every queued record created before `cutoff`.
///
/// Returns the number of records removed. Records that disappear while the
/// purge runs are not an error.
///
/// # Errors
///
/// Fails if the store cannot be listed or a delete fails.
#[tracing::instrument(level = "debug", skip(store))]
pub async fn purge_expired(store: &dyn QueueStore, cutoff: DateTime<Utc>) -> Result<usize> {
    let mut purged = 0;

    for record in store.all().await? {
        if record.created_at >= cutoff {
            continue;
        }

        match store.delete(&record.id).await {
            Ok(()) | Err(QueueError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        internal!(
            level = DEBUG,
            "Purged message {} created at {}",
            record.id,
            record.created_at
        );
        purged += 1;
    }

    if purged > 0 {
        internal!(level = INFO, "Purged {purged} expired message(s) from the queue");
    }

    Ok(purged)
}
