//! # nodewatch
//!
//! Live metrics reconciliation and time-series assembly for a simulated
//! node network.
//!
//! The node manager exposes a pull API (node status, historical metrics,
//! start/stop) and a push channel that streams new metric records. This
//! crate merges both into one deduplicated event log, tracks per-node
//! uptime from periodic status polls, keeps the push channel alive across
//! failures, and turns the log into chart-ready matrices.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                           session                             │
//! │  ┌────────────┐  StreamEvent  ┌───────────┐   ┌────────────┐  │
//! │  │   source   │──────────────▶│    app    │──▶│    data    │  │
//! │  │(supervisor)│               │(Dashboard)│   │ (ingest,   │  │
//! │  └────────────┘               └─────▲─────┘   │ lifecycle, │  │
//! │                                     │         │  series)   │  │
//! │          nodewatch-client ──────────┘         └────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`source`]**: the push-channel [`Supervisor`] with capped exponential
//!   backoff, payload decoding and the WebSocket transport
//! - **[`data`]**: the deduplicating [`IngestBuffer`], the [`NodeTracker`]
//!   uptime model and the [`build_series`] aggregator
//! - **[`app`]**: the [`Dashboard`] reducer, sole owner of all state
//! - **[`session`]**: timers, backfill and the event loop around the dashboard
//! - **[`settings`]**: layered configuration
//!
//! ## Usage
//!
//! ### As a CLI tool
//!
//! ```bash
//! # Watch the default manager on localhost:8000
//! nodewatch
//!
//! # Start 4 nodes for 20 rounds, then watch two metrics as deltas
//! nodewatch --start 4 --rounds 20 --metric total_sent --metric resent --mode delta
//!
//! # Snapshot the current series to a file
//! nodewatch --export metrics.json
//! ```
//!
//! ### As a library
//!
//! ```
//! use nodewatch::{Dashboard, SeriesOptions};
//! use serde_json::json;
//!
//! let mut dashboard = Dashboard::new(SeriesOptions::default(), vec!["msg_sent".into()]);
//! dashboard.ingest(&[
//!     json!({"timestamp": "2024-05-01T10:00:00Z", "field": "msg_sent", "node": "A", "value": 5}),
//!     json!({"timestamp": "2024-05-01T10:00:00Z", "field": "msg_sent", "node": "B", "value": 7}),
//!     json!({"timestamp": "2024-05-01T10:00:01Z", "field": "msg_sent", "node": "A", "value": 9}),
//! ]);
//!
//! let matrix = dashboard.build_series("msg_sent");
//! assert_eq!(matrix.column("B"), vec![Some(7.0), None]);
//! ```

pub mod app;
pub mod data;
pub mod session;
pub mod settings;
pub mod source;

pub use app::{ConnectionView, Dashboard, ErrorBanner, ErrorKind, NodeSummary};
pub use data::{
    build_series, DedupKey, DisplayMode, IngestBuffer, IngestReport, MetricRecord, NodeState,
    NodeTracker, NodeUptime, RecordError, SeriesMatrix, SeriesOptions, SeriesRow,
};
pub use session::{Session, Timers};
pub use settings::Settings;
pub use source::{Backoff, PayloadError, StreamEvent, Supervisor, TransportError};
