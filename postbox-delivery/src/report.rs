use std::fmt;

/// Outcome counters of one delivery run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Due records in the queue when the run started
    pub total_due: usize,
    /// Records selected for this run
    pub selected: usize,
    /// Records handed off and archived
    pub sent: usize,
    /// Records moved to the dead-letter store
    pub dead_lettered: usize,
    /// Records given a failed attempt or rescheduled
    pub deferred: usize,
    /// Records left exactly as they were (busy relay, broken default, dead
    /// session)
    pub untouched: usize,
    /// Records whose override was removed
    pub overrides_stripped: usize,
    /// Relay sessions attempted
    pub groups: usize,
    /// Expired records deleted before selection
    pub purged: usize,
    /// The run stopped early on shutdown
    pub interrupted: bool,
}

impl RunReport {
    /// Selected records that have not been accounted for yet.
    #[must_use]
    pub const fn unprocessed(&self) -> usize {
        self.selected.saturating_sub(
            self.sent + self.dead_lettered + self.deferred + self.untouched + self.overrides_stripped,
        )
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent {}/{} (due {}), deferred {}, untouched {}, overrides stripped {}, \
             dead-lettered {}, purged {}, groups {}",
            self.sent,
            self.selected,
            self.total_due,
            self.deferred,
            self.untouched,
            self.overrides_stripped,
            self.dead_lettered,
            self.purged,
            self.groups
        )?;

        if self.interrupted {
            f.write_str(" (interrupted)")?;
        }

        Ok(())
    }
}
