//! Data models and processing for node metrics.
//!
//! ## Submodules
//!
//! - [`record`]: Validated [`MetricRecord`]s and their [`DedupKey`]
//! - [`ingest`]: The deduplicating [`IngestBuffer`] that owns the event log
//! - [`lifecycle`]: Per-node uptime tracking from status snapshots
//! - [`series`]: Time-bucketed, null-filled matrices for charting
//! - [`catalog`]: Display names, units and groups for known metrics
//! - [`duration`]: Duration parsing and uptime formatting
//!
//! ## Data Flow
//!
//! ```text
//! stream batch / backfill (raw JSON)
//!        │
//!        ▼
//! IngestBuffer::ingest()  ──▶ event log (deduplicated, arrival order)
//!        │                          │
//!        ▼                          ▼
//! NodeTracker::observe()     build_series() ──▶ SeriesMatrix
//!        ▲
//!        │
//! status poll ──▶ NodeTracker::apply_snapshot(), tick()
//! ```

pub mod catalog;
pub mod duration;
pub mod ingest;
pub mod lifecycle;
pub mod record;
pub mod series;

pub use catalog::{MetricGroup, MetricInfo};
pub use ingest::{IngestBuffer, IngestReport};
pub use lifecycle::{NodeState, NodeTracker, NodeUptime, SnapshotChanges};
pub use record::{DedupKey, MetricRecord, RecordError};
pub use series::{build_series, DisplayMode, SeriesMatrix, SeriesOptions, SeriesRow};
