//! `mailq`-style listing of the queue.

use std::io::{self, Write};

use postbox_queue::MessageRecord;

const HEADER: &str =
    "-Queue ID-                 --Size-- ----Arrival Time---- -Sender/Recipient-------";

/// Writes every record, due or not, followed by a size summary.
///
/// # Errors
///
/// Fails if writing to `out` fails.
pub fn render(records: &[MessageRecord], out: &mut impl Write) -> io::Result<()> {
    if records.is_empty() {
        return writeln!(out, "Mail queue is empty");
    }

    writeln!(out, "{HEADER}")?;

    let mut total_size = 0;
    for record in records {
        let size = record.size();
        total_size += size;

        writeln!(
            out,
            "{:<26} {size:>8} {} {}",
            record.id.to_string(),
            record.created_at.format("%a %b %d %H:%M:%S"),
            record.sender
        )?;

        if let Some(last) = record.last_attempt_at {
            writeln!(out, "Last send attempt: {}", last.format("%Y-%m-%d %H:%M:%S UTC"))?;
        }

        writeln!(out, " {}", record.recipient)?;
        writeln!(out)?;
    }

    writeln!(
        out,
        "-- {} Kbytes in {} Requests.",
        total_size / 1024,
        records.len()
    )
}
