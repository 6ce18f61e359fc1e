//! Dashboard state.
//!
//! [`Dashboard`] is the single owner of the event log, the node uptime map
//! and the last observed connection state. Every mutation goes through one
//! of its operations; everything else reads snapshots.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use nodewatch_client::{ClientError, NodeStatusSnapshot};

use crate::data::catalog::{self, CURRENT_ROUND};
use crate::data::lifecycle::{estimate_remaining, progress_percent};
use crate::data::{
    build_series, IngestBuffer, IngestReport, NodeTracker, NodeUptime, SeriesMatrix,
    SeriesOptions, SnapshotChanges,
};
use crate::source::{Phase, StreamEvent};

/// Category of the most recent failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Streaming connection failed.
    Stream,
    /// A pushed message could not be decoded.
    Payload,
    /// Status poll failed.
    Status,
    /// Historical metrics fetch failed.
    Backfill,
    /// Start/stop/clear request failed.
    Control,
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Stream => "stream",
            ErrorKind::Payload => "payload",
            ErrorKind::Status => "status",
            ErrorKind::Backfill => "backfill",
            ErrorKind::Control => "control",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The transient error shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBanner {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for ErrorBanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

/// What the dashboard last heard from the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionView {
    pub phase: Phase,
    /// Current reconnect attempt; 0 once a connection opens.
    pub attempt: u32,
    /// Delay of the pending reconnect, if one is scheduled.
    pub retry_in: Option<Duration>,
}

impl Default for ConnectionView {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            attempt: 0,
            retry_in: None,
        }
    }
}

impl ConnectionView {
    pub fn label(&self) -> String {
        match (self.phase, self.retry_in) {
            (Phase::Open, _) => "open".to_string(),
            (Phase::Connecting, _) if self.attempt > 0 => {
                format!("connecting (attempt {})", self.attempt)
            }
            (Phase::Connecting, _) => "connecting".to_string(),
            (Phase::Closing, _) => "closing".to_string(),
            (Phase::Idle, Some(delay)) => format!("retrying in {}s", delay.as_secs()),
            (Phase::Idle, None) => "idle".to_string(),
        }
    }
}

/// Everything the views need about one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSummary {
    pub name: String,
    pub state: String,
    pub uptime: String,
    pub elapsed_ms: u64,
    pub current_round: Option<f64>,
    pub progress: Option<f64>,
    pub eta: Option<String>,
}

#[derive(Serialize)]
struct Export<'a> {
    generated_at: DateTime<Utc>,
    records: usize,
    connection: String,
    error: Option<&'a ErrorBanner>,
    nodes: Vec<NodeSummary>,
    series: Vec<SeriesMatrix>,
}

/// The reducer behind the dashboard.
#[derive(Debug)]
pub struct Dashboard {
    buffer: IngestBuffer,
    tracker: NodeTracker,
    connection: ConnectionView,
    banner: Option<ErrorBanner>,
    display: SeriesOptions,
    metrics: Vec<String>,
    total_rounds: Option<u64>,
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new(SeriesOptions::default(), catalog::default_selection())
    }
}

impl Dashboard {
    /// Create a dashboard with the given display options and metric
    /// selection. An empty selection falls back to the default set.
    pub fn new(display: SeriesOptions, metrics: Vec<String>) -> Self {
        let metrics = if metrics.is_empty() {
            catalog::default_selection()
        } else {
            metrics
        };
        Self {
            buffer: IngestBuffer::new(),
            tracker: NodeTracker::new(),
            connection: ConnectionView::default(),
            banner: None,
            display,
            metrics,
            total_rounds: None,
        }
    }

    /// Configured round count, used for progress and ETA.
    pub fn with_total_rounds(mut self, rounds: u64) -> Self {
        self.total_rounds = Some(rounds);
        self
    }

    pub fn set_total_rounds(&mut self, rounds: Option<u64>) {
        self.total_rounds = rounds;
    }

    pub fn total_rounds(&self) -> Option<u64> {
        self.total_rounds
    }

    // --- errors ---

    pub fn banner(&self) -> Option<&ErrorBanner> {
        self.banner.as_ref()
    }

    /// Replace the banner with a new failure.
    pub fn set_error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.banner = Some(ErrorBanner {
            kind,
            message: message.into(),
        });
    }

    /// A success of `kind` clears the banner only if it shows that kind.
    pub fn clear_error(&mut self, kind: ErrorKind) {
        if self.banner.as_ref().is_some_and(|b| b.kind == kind) {
            self.banner = None;
        }
    }

    // --- stream ---

    pub fn connection(&self) -> &ConnectionView {
        &self.connection
    }

    /// Fold one supervisor event into the state. Returns the ingestion
    /// report for batches.
    pub fn handle_stream_event(&mut self, event: StreamEvent) -> Option<IngestReport> {
        match event {
            StreamEvent::Connecting { attempt } => {
                self.connection.phase = Phase::Connecting;
                self.connection.attempt = attempt;
                self.connection.retry_in = None;
                None
            }
            StreamEvent::Open => {
                self.connection = ConnectionView {
                    phase: Phase::Open,
                    ..ConnectionView::default()
                };
                self.clear_error(ErrorKind::Stream);
                None
            }
            StreamEvent::Batch(batch) => {
                let report = self.ingest(&batch);
                self.clear_error(ErrorKind::Payload);
                Some(report)
            }
            StreamEvent::ParseError(e) => {
                self.set_error(ErrorKind::Payload, e.to_string());
                None
            }
            StreamEvent::Error(e) => {
                self.set_error(ErrorKind::Stream, e.to_string());
                None
            }
            StreamEvent::Closed => {
                self.connection.phase = Phase::Idle;
                None
            }
            StreamEvent::Reconnecting { attempt, delay } => {
                self.connection.phase = Phase::Idle;
                self.connection.attempt = attempt;
                self.connection.retry_in = Some(delay);
                None
            }
        }
    }

    // --- event log ---

    pub fn buffer(&self) -> &IngestBuffer {
        &self.buffer
    }

    /// Admit a pushed batch; nodes seen in admitted records become known.
    pub fn ingest(&mut self, batch: &[Value]) -> IngestReport {
        let before = self.buffer.len();
        let report = self.buffer.ingest(batch);
        self.observe_since(before);
        report
    }

    /// Admit the historical backfill through the same dedup path.
    pub fn load_snapshot(&mut self, records: &[Value]) -> IngestReport {
        let before = self.buffer.len();
        let report = self.buffer.load_snapshot(records);
        self.observe_since(before);
        report
    }

    /// Fold the result of a backfill request.
    pub fn apply_backfill(
        &mut self,
        result: Result<Vec<Value>, ClientError>,
    ) -> Option<IngestReport> {
        match result {
            Ok(records) => {
                let report = self.load_snapshot(&records);
                self.clear_error(ErrorKind::Backfill);
                Some(report)
            }
            Err(e) => {
                warn!(error = %e, "Failed to load historical metrics");
                self.set_error(ErrorKind::Backfill, e.to_string());
                None
            }
        }
    }

    fn observe_since(&mut self, start: usize) {
        for record in &self.buffer.records()[start..] {
            self.tracker.observe(record.node());
        }
    }

    // --- lifecycle ---

    pub fn tracker(&self) -> &NodeTracker {
        &self.tracker
    }

    /// Fold the result of a status poll. A failure leaves known nodes as
    /// they were.
    pub fn apply_status(
        &mut self,
        result: Result<Vec<NodeStatusSnapshot>, ClientError>,
    ) -> Option<SnapshotChanges> {
        match result {
            Ok(snapshots) => {
                let changes = self.tracker.apply_snapshot(&snapshots);
                for node in &changes.discovered {
                    info!(node = %node, "Discovered node");
                }
                self.clear_error(ErrorKind::Status);
                Some(changes)
            }
            Err(e) => {
                warn!(error = %e, "Status poll failed");
                self.set_error(ErrorKind::Status, e.to_string());
                None
            }
        }
    }

    /// Advance running nodes' uptime to `now`.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        self.tracker.tick(now);
    }

    /// Fold the result of a start/stop/clear request. Returns true on
    /// success.
    pub fn apply_control(&mut self, action: &str, result: Result<(), ClientError>) -> bool {
        match result {
            Ok(()) => {
                info!(action, "Control request succeeded");
                self.clear_error(ErrorKind::Control);
                true
            }
            Err(e) => {
                warn!(action, error = %e, "Control request failed");
                self.set_error(ErrorKind::Control, format!("{action}: {e}"));
                false
            }
        }
    }

    // --- resets ---

    /// Explicit user reset: empty the log, forget every node and restore
    /// the default metric selection.
    pub fn reset(&mut self) {
        info!(records = self.buffer.len(), nodes = self.tracker.len(), "Resetting dashboard");
        self.buffer.clear();
        self.tracker.clear();
        self.metrics = catalog::default_selection();
        self.banner = None;
    }

    /// Empty the metrics log ahead of starting a new run. Known nodes keep
    /// their uptime history.
    pub fn prepare_restart(&mut self) {
        debug!(records = self.buffer.len(), "Clearing metrics before restart");
        self.buffer.clear();
    }

    // --- views ---

    pub fn display(&self) -> &SeriesOptions {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut SeriesOptions {
        &mut self.display
    }

    pub fn selected_metrics(&self) -> &[String] {
        &self.metrics
    }

    /// Add or remove a metric from the selection. Returns true if it is
    /// now selected.
    pub fn toggle_metric(&mut self, key: &str) -> bool {
        if let Some(pos) = self.metrics.iter().position(|m| m == key) {
            self.metrics.remove(pos);
            false
        } else {
            self.metrics.push(key.to_string());
            true
        }
    }

    /// Every node name seen in a status snapshot or an admitted record.
    pub fn known_nodes(&self) -> BTreeSet<String> {
        self.tracker.names()
    }

    /// Matrix for one metric over all known nodes.
    pub fn build_series(&self, metric: &str) -> SeriesMatrix {
        build_series(
            self.buffer.records(),
            metric,
            &self.known_nodes(),
            &self.display,
        )
    }

    /// Matrices for the selected metrics, in selection order.
    pub fn selected_series(&self) -> Vec<SeriesMatrix> {
        let nodes = self.known_nodes();
        self.metrics
            .iter()
            .map(|m| build_series(self.buffer.records(), m, &nodes, &self.display))
            .collect()
    }

    /// Latest reported round for a node.
    pub fn current_round(&self, node: &str) -> Option<f64> {
        self.buffer.latest(CURRENT_ROUND, node).map(|r| r.value())
    }

    /// One summary per known node, in name order.
    pub fn node_summaries(&self) -> Vec<NodeSummary> {
        self.tracker.iter().map(|u| self.summarize(u)).collect()
    }

    fn summarize(&self, uptime: &NodeUptime) -> NodeSummary {
        let current_round = self.current_round(&uptime.node);
        let progress = self
            .total_rounds
            .zip(current_round)
            .map(|(total, round)| progress_percent(round, total));
        let eta = self.total_rounds.zip(current_round).and_then(|(total, round)| {
            let round = if round.is_finite() && round > 0.0 {
                round as u64
            } else {
                0
            };
            estimate_remaining(uptime.elapsed, round, total)
                .map(crate::data::duration::format_eta)
        });
        NodeSummary {
            name: uptime.node.clone(),
            state: uptime.state.label().to_string(),
            uptime: uptime.uptime_label(),
            elapsed_ms: uptime.elapsed_ms().min(u64::MAX as u128) as u64,
            current_round,
            progress,
            eta,
        }
    }

    /// Write the current state (nodes plus selected series) as pretty JSON.
    pub fn export(&self, path: &Path) -> Result<()> {
        use std::io::Write;

        let export = Export {
            generated_at: Utc::now(),
            records: self.buffer.len(),
            connection: self.connection.label(),
            error: self.banner.as_ref(),
            nodes: self.node_summaries(),
            series: self.selected_series(),
        };
        let json = serde_json::to_string_pretty(&export)?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(json.as_bytes())?;
        debug!(path = %path.display(), "Exported dashboard");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DisplayMode, NodeState};
    use crate::source::{PayloadError, TransportError};
    use serde_json::json;

    fn metric(ts: &str, field: &str, node: &str, value: f64) -> Value {
        json!({"timestamp": ts, "field": field, "node": node, "value": value})
    }

    fn utc_options() -> SeriesOptions {
        SeriesOptions {
            local_time: false,
            ..SeriesOptions::default()
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_default_selection() {
        let dashboard = Dashboard::new(utc_options(), Vec::new());
        assert_eq!(dashboard.selected_metrics().len(), catalog::ALWAYS_ACTIVE.len());
    }

    #[test]
    fn test_banner_cleared_only_by_same_kind() {
        let mut dashboard = Dashboard::default();
        dashboard.set_error(ErrorKind::Status, "boom");
        dashboard.clear_error(ErrorKind::Stream);
        assert_eq!(dashboard.banner().unwrap().kind, ErrorKind::Status);

        dashboard.set_error(ErrorKind::Stream, "reset");
        assert_eq!(dashboard.banner().unwrap().message, "reset");
        dashboard.clear_error(ErrorKind::Stream);
        assert!(dashboard.banner().is_none());
    }

    #[test]
    fn test_ingest_registers_nodes() {
        let mut dashboard = Dashboard::new(utc_options(), vec!["msg_sent".to_string()]);
        let report = dashboard.ingest(&[
            metric("2024-05-01T10:00:00Z", "msg_sent", "node_a", 5.0),
            metric("2024-05-01T10:00:00Z", "msg_sent", "node_b", 7.0),
            json!({"field": "msg_sent"}),
        ]);
        assert_eq!(report.admitted, 2);
        assert_eq!(report.malformed, 1);
        let nodes: Vec<_> = dashboard.known_nodes().into_iter().collect();
        assert_eq!(nodes, vec!["node_a", "node_b"]);
    }

    #[test]
    fn test_stream_events_update_connection_view() {
        let mut dashboard = Dashboard::default();
        dashboard.set_error(ErrorKind::Stream, "refused");

        dashboard.handle_stream_event(StreamEvent::Connecting { attempt: 0 });
        assert_eq!(dashboard.connection().phase, Phase::Connecting);

        dashboard.handle_stream_event(StreamEvent::Open);
        assert_eq!(dashboard.connection().phase, Phase::Open);
        assert!(dashboard.banner().is_none());

        dashboard.handle_stream_event(StreamEvent::Error(TransportError::Read("eof".into())));
        dashboard.handle_stream_event(StreamEvent::Closed);
        dashboard.handle_stream_event(StreamEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(2),
        });
        let view = dashboard.connection();
        assert_eq!(view.phase, Phase::Idle);
        assert_eq!(view.attempt, 1);
        assert_eq!(view.label(), "retrying in 2s");
        assert_eq!(dashboard.banner().unwrap().kind, ErrorKind::Stream);
    }

    #[test]
    fn test_parse_error_then_batch_clears_payload_banner() {
        let mut dashboard = Dashboard::default();
        dashboard.handle_stream_event(StreamEvent::ParseError(PayloadError::NotArray));
        assert_eq!(dashboard.banner().unwrap().kind, ErrorKind::Payload);

        let report = dashboard.handle_stream_event(StreamEvent::Batch(vec![metric(
            "2024-05-01T10:00:00Z",
            "total_sent",
            "node_0",
            1.0,
        )]));
        assert_eq!(report.unwrap().admitted, 1);
        assert!(dashboard.banner().is_none());
    }

    #[test]
    fn test_failed_status_poll_keeps_nodes() {
        let mut dashboard = Dashboard::default();
        dashboard.apply_status(Ok(vec![
            NodeStatusSnapshot::new("node_0", "running").started_at("2024-05-01T10:00:00Z")
        ]));
        dashboard.tick(at("2024-05-01T10:00:42Z"));

        let changes = dashboard.apply_status(Err(ClientError::Timeout));
        assert!(changes.is_none());
        assert_eq!(dashboard.banner().unwrap().kind, ErrorKind::Status);

        let node = dashboard.tracker().get("node_0").unwrap();
        assert_eq!(node.state, NodeState::Running);
        assert_eq!(node.elapsed, Duration::from_secs(42));

        dashboard.apply_status(Ok(vec![NodeStatusSnapshot::new("node_0", "running")]));
        assert!(dashboard.banner().is_none());
    }

    #[test]
    fn test_backfill_and_stream_dedup() {
        let mut dashboard = Dashboard::default();
        let record = metric("2024-05-01T10:00:00Z", "total_sent", "node_0", 3.0);
        dashboard.apply_backfill(Ok(vec![record.clone()]));
        let report = dashboard.handle_stream_event(StreamEvent::Batch(vec![record]));
        assert_eq!(report.unwrap().duplicates, 1);
        assert_eq!(dashboard.buffer().len(), 1);
    }

    #[test]
    fn test_backfill_failure_sets_banner() {
        let mut dashboard = Dashboard::default();
        let result = dashboard.apply_backfill(Err(ClientError::Connection("refused".into())));
        assert!(result.is_none());
        assert_eq!(dashboard.banner().unwrap().kind, ErrorKind::Backfill);
    }

    #[test]
    fn test_control_result() {
        let mut dashboard = Dashboard::default();
        assert!(!dashboard.apply_control(
            "start",
            Err(ClientError::Status {
                path: "/nodes/start".into(),
                status: 500
            })
        ));
        assert!(dashboard.banner().unwrap().message.starts_with("start:"));
        assert!(dashboard.apply_control("start", Ok(())));
        assert!(dashboard.banner().is_none());
    }

    #[test]
    fn test_reset_and_prepare_restart() {
        let mut dashboard = Dashboard::new(utc_options(), vec!["msg_sent".to_string()]);
        dashboard.ingest(&[metric("2024-05-01T10:00:00Z", "msg_sent", "node_a", 5.0)]);

        dashboard.prepare_restart();
        assert!(dashboard.buffer().is_empty());
        assert_eq!(dashboard.known_nodes().len(), 1);
        assert_eq!(dashboard.selected_metrics(), ["msg_sent".to_string()]);

        dashboard.ingest(&[metric("2024-05-01T10:00:00Z", "msg_sent", "node_a", 5.0)]);
        dashboard.reset();
        assert!(dashboard.buffer().is_empty());
        assert!(dashboard.known_nodes().is_empty());
        assert_eq!(dashboard.selected_metrics(), catalog::default_selection());
    }

    #[test]
    fn test_toggle_metric() {
        let mut dashboard = Dashboard::new(utc_options(), vec!["resent".to_string()]);
        assert!(dashboard.toggle_metric("avg_rtt"));
        assert!(!dashboard.toggle_metric("resent"));
        assert_eq!(dashboard.selected_metrics(), ["avg_rtt".to_string()]);
    }

    #[test]
    fn test_build_series_uses_display_mode() {
        let mut dashboard = Dashboard::new(utc_options(), vec!["msg_sent".to_string()]);
        dashboard.ingest(&[
            metric("2024-05-01T10:00:00Z", "msg_sent", "A", 5.0),
            metric("2024-05-01T10:00:01Z", "msg_sent", "A", 9.0),
        ]);
        dashboard.display_mut().mode = DisplayMode::Delta;
        let matrix = dashboard.build_series("msg_sent");
        assert_eq!(matrix.column("A"), vec![Some(0.0), Some(4.0)]);
    }

    #[test]
    fn test_node_summary_progress_and_eta() {
        let mut dashboard = Dashboard::default().with_total_rounds(10);
        dashboard.apply_status(Ok(vec![
            NodeStatusSnapshot::new("node_0", "running").started_at("2024-05-01T10:00:00Z")
        ]));
        dashboard.ingest(&[metric("2024-05-01T10:02:00Z", CURRENT_ROUND, "node_0", 2.0)]);
        dashboard.tick(at("2024-05-01T10:02:00Z"));

        let summary = &dashboard.node_summaries()[0];
        assert_eq!(summary.state, "running");
        assert_eq!(summary.uptime, "2m 0s");
        assert_eq!(summary.current_round, Some(2.0));
        assert_eq!(summary.progress, Some(20.0));
        assert_eq!(summary.eta.as_deref(), Some("8m"));
    }

    #[test]
    fn test_export_writes_series() {
        let mut dashboard = Dashboard::new(utc_options(), vec!["msg_sent".to_string()]);
        dashboard.ingest(&[metric("2024-05-01T10:00:00Z", "msg_sent", "A", 5.0)]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        dashboard.export(&path).unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["records"], 1);
        assert_eq!(written["series"][0]["metric"], "msg_sent");
        assert_eq!(written["series"][0]["rows"][0]["timestamp"], "10:00:00");
        assert_eq!(written["series"][0]["rows"][0]["A"], 5.0);
        assert_eq!(written["nodes"][0]["name"], "A");
    }
}
