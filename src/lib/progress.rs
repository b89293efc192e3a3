//! Progress logging for record streams.
//!
//! The tracker counts records and logs every `interval` records, including the
//! genomic position of the last record seen so that stalls can be located.

use log::info;
use noodles::sam::Header;
use noodles::sam::alignment::RecordBuf;

use crate::logging::format_count;

/// Logs progress every `interval` records.
///
/// ```
/// use fgtrim_lib::progress::ProgressTracker;
///
/// let mut tracker = ProgressTracker::new("Trimmed").with_interval(100);
/// for _ in 0..250 {
///     tracker.tick(None); // logs at 100 and 200
/// }
/// assert_eq!(tracker.count(), 250);
/// tracker.log_final();
/// ```
pub struct ProgressTracker {
    interval: u64,
    verb: String,
    count: u64,
}

impl ProgressTracker {
    /// Creates a tracker with a default interval of 1,000,000 records.
    #[must_use]
    pub fn new(verb: impl Into<String>) -> Self {
        Self { interval: 1_000_000, verb: verb.into(), count: 0 }
    }

    /// Sets the number of records between log messages.
    #[must_use]
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self
    }

    /// Number of records seen so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Counts one record, logging when an interval boundary is reached.
    ///
    /// `location` is appended to the message when present.
    /// Returns `true` if a message was logged.
    pub fn tick(&mut self, location: Option<String>) -> bool {
        self.count += 1;
        if !self.count.is_multiple_of(self.interval) {
            return false;
        }
        match location {
            Some(loc) => {
                info!(
                    "{} {} records. Last read position: {loc}",
                    self.verb,
                    format_count(self.count)
                );
            }
            None => info!("{} {} records.", self.verb, format_count(self.count)),
        }
        true
    }

    /// Counts one alignment record, reporting its position when logging.
    pub fn record(&mut self, record: &RecordBuf, header: &Header) -> bool {
        if (self.count + 1).is_multiple_of(self.interval) {
            self.tick(Some(describe_position(record, header)))
        } else {
            self.tick(None)
        }
    }

    /// Logs the final count unless it was already logged on an interval boundary.
    pub fn log_final(&self) {
        if self.count == 0 || !self.count.is_multiple_of(self.interval) {
            info!("{} {} records (complete).", self.verb, format_count(self.count));
        }
    }
}

fn describe_position(record: &RecordBuf, header: &Header) -> String {
    if record.flags().is_unmapped() {
        return "*/*".to_string();
    }
    let contig = record
        .reference_sequence_id()
        .and_then(|id| header.reference_sequences().get_index(id))
        .map_or_else(|| "*".to_string(), |(name, _)| name.to_string());
    let pos = record.alignment_start().map_or(0, usize::from);
    format!("{contig}:{}", format_count(pos as u64))
}
