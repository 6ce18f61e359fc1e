//! Deduplicating ingestion buffer.
//!
//! The buffer is the only writer of the event log. Records reach it from
//! two places (the historical backfill and the live stream) that may
//! redeliver the same observation in either order, so every path goes
//! through the same at-most-once admission check.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::record::{DedupKey, MetricRecord, RecordError};

/// Outcome of one `ingest` or `load_snapshot` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Records appended to the log.
    pub admitted: usize,
    /// Records dropped because their key was already present.
    pub duplicates: usize,
    /// Records dropped because they failed validation.
    pub malformed: usize,
}

impl IngestReport {
    /// Total records examined.
    pub fn total(&self) -> usize {
        self.admitted + self.duplicates + self.malformed
    }
}

/// Append-only, deduplicated event log plus its membership set.
#[derive(Debug, Default)]
pub struct IngestBuffer {
    log: Vec<MetricRecord>,
    seen: HashSet<DedupKey>,
    total_duplicates: u64,
    total_malformed: u64,
}

impl IngestBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a batch of raw records from the stream.
    ///
    /// Invalid records are counted and skipped; duplicates are dropped
    /// silently. Never fails.
    pub fn ingest(&mut self, batch: &[serde_json::Value]) -> IngestReport {
        let report = self.admit_all(batch.iter().map(MetricRecord::from_value));
        if report.malformed > 0 {
            warn!(
                malformed = report.malformed,
                admitted = report.admitted,
                "Dropped malformed metric records"
            );
        } else {
            debug!(
                admitted = report.admitted,
                duplicates = report.duplicates,
                "Ingested batch"
            );
        }
        report
    }

    /// Bulk-admit the historical backfill through the same dedup path.
    pub fn load_snapshot(&mut self, records: &[serde_json::Value]) -> IngestReport {
        let report = self.admit_all(records.iter().map(MetricRecord::from_value));
        info!(
            admitted = report.admitted,
            duplicates = report.duplicates,
            malformed = report.malformed,
            "Loaded historical metrics"
        );
        report
    }

    /// Admit already-validated records.
    pub fn ingest_records<I>(&mut self, records: I) -> IngestReport
    where
        I: IntoIterator<Item = MetricRecord>,
    {
        self.admit_all(records.into_iter().map(Ok))
    }

    fn admit_all<I>(&mut self, records: I) -> IngestReport
    where
        I: IntoIterator<Item = Result<MetricRecord, RecordError>>,
    {
        let mut report = IngestReport::default();
        for result in records {
            match result {
                Ok(record) => {
                    if self.admit(record) {
                        report.admitted += 1;
                    } else {
                        report.duplicates += 1;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Skipping malformed record");
                    report.malformed += 1;
                }
            }
        }
        self.total_duplicates += report.duplicates as u64;
        self.total_malformed += report.malformed as u64;
        report
    }

    /// Append a record unless its key is already present.
    fn admit(&mut self, record: MetricRecord) -> bool {
        if self.seen.contains(record.key()) {
            return false;
        }
        self.seen.insert(record.key().clone());
        self.log.push(record);
        true
    }

    /// Empty the log and membership set. Only called on an explicit reset.
    pub fn clear(&mut self) {
        self.log.clear();
        self.seen.clear();
        self.total_duplicates = 0;
        self.total_malformed = 0;
    }

    /// Read-only view of the log, in arrival order.
    pub fn records(&self) -> &[MetricRecord] {
        &self.log
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Duplicates dropped since the last clear.
    pub fn total_duplicates(&self) -> u64 {
        self.total_duplicates
    }

    /// Malformed records dropped since the last clear.
    pub fn total_malformed(&self) -> u64 {
        self.total_malformed
    }

    /// The chronologically latest record for `field` on `node`.
    pub fn latest(&self, field: &str, node: &str) -> Option<&MetricRecord> {
        self.log
            .iter()
            .filter(|r| r.field() == field && r.node() == node)
            .max_by(|a, b| {
                a.timestamp()
                    .cmp(&b.timestamp())
                    .then_with(|| a.key().cmp(b.key()))
            })
    }
}
