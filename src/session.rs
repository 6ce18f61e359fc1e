//! The live watch session.
//!
//! A [`Session`] ties the dashboard to the outside world: it owns the control
//! client, the stream supervisor and the three independent timers (status
//! poll, uptime tick, summary report). Everything runs on one task, so the
//! dashboard has exactly one writer.
//!
//! ```text
//!            ┌──────────────┐   StreamEvent   ┌───────────┐
//!  ws  ────▶ │  Supervisor  │ ──────────────▶ │           │
//!            └──────────────┘                 │           │
//!   status poll (1-10s) ─────────────────────▶│ Dashboard │
//!   uptime tick (1s) ────────────────────────▶│           │
//!   report (optional) ◀───────────────────────│           │
//!                                             └───────────┘
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

use nodewatch_client::{ControlClient, StartRequest};

use crate::app::Dashboard;
use crate::data::catalog;
use crate::data::IngestReport;
use crate::settings::Settings;
use crate::source::{Connector, Supervisor, WebSocketConnector};

/// Pause between a successful start request and the follow-up status poll,
/// giving the manager time to launch containers.
const RESTART_SETTLE: Duration = Duration::from_millis(500);

/// Timer cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timers {
    pub status: Duration,
    pub tick: Duration,
    pub report: Option<Duration>,
}

impl Default for Timers {
    fn default() -> Self {
        Self {
            status: Duration::from_secs(2),
            tick: Duration::from_secs(1),
            report: Some(Duration::from_secs(10)),
        }
    }
}

pub struct Session {
    client: ControlClient,
    supervisor: Supervisor,
    dashboard: Dashboard,
    timers: Timers,
}

impl Session {
    pub fn new(
        client: ControlClient,
        supervisor: Supervisor,
        dashboard: Dashboard,
        timers: Timers,
    ) -> Self {
        Self {
            client,
            supervisor,
            dashboard,
            timers,
        }
    }

    /// Build a session that talks to the endpoints in `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let client = ControlClient::builder()
            .endpoint(settings.api_url.as_str())
            .timeout(settings.request_timeout()?)
            .build()?;
        let connector: Arc<dyn Connector> =
            Arc::new(WebSocketConnector::new(settings.stream_url.as_str()));
        let supervisor = Supervisor::new(connector, settings.backoff());
        let mut dashboard = Dashboard::new(settings.series_options(), settings.metrics.clone());
        if let Some(rounds) = settings.rounds {
            dashboard = dashboard.with_total_rounds(rounds);
        }
        let timers = Timers {
            status: settings.status_interval()?,
            tick: settings.tick_interval()?,
            report: settings.report_interval()?,
        };
        Ok(Self::new(client, supervisor, dashboard, timers))
    }

    pub fn dashboard(&self) -> &Dashboard {
        &self.dashboard
    }

    pub fn dashboard_mut(&mut self) -> &mut Dashboard {
        &mut self.dashboard
    }

    pub fn client(&self) -> &ControlClient {
        &self.client
    }

    /// One-time historical fetch through the dedup path.
    pub async fn backfill(&mut self) -> Option<IngestReport> {
        let result = self.client.fetch_metrics().await;
        self.dashboard.apply_backfill(result)
    }

    /// Poll node status once.
    pub async fn poll_status(&mut self) {
        let result = self.client.fetch_status().await;
        if let Some(changes) = self.dashboard.apply_status(result) {
            if !changes.missing.is_empty() {
                debug!(missing = ?changes.missing, "Nodes missing from status");
            }
        }
        self.dashboard.tick(Utc::now());
    }

    /// Start a fresh run: start nodes, clear the metrics log and, if the
    /// stream is live, resubscribe. Returns false if the start request
    /// failed, in which case nothing is cleared.
    pub async fn restart(&mut self, request: &StartRequest) -> bool {
        let request = request.clone().clamped();
        info!(count = request.count, rounds = request.rounds, "Starting nodes");
        let result = self.client.start_nodes(&request).await;
        if !self.dashboard.apply_control("start", result) {
            return false;
        }

        self.dashboard.prepare_restart();
        self.dashboard.set_total_rounds(Some(u64::from(request.rounds)));
        if self.supervisor.is_active() {
            self.supervisor.resubscribe();
        }

        tokio::time::sleep(RESTART_SETTLE).await;
        self.poll_status().await;
        true
    }

    /// Stop every node.
    pub async fn stop_nodes(&mut self) -> bool {
        let result = self.client.stop_nodes().await;
        self.dashboard.apply_control("stop", result)
    }

    /// Clear the manager's stored logs and metrics.
    pub async fn clear_logs(&mut self) -> bool {
        let result = self.client.clear_logs().await;
        self.dashboard.apply_control("clear", result)
    }

    /// Run until `shutdown` resolves.
    ///
    /// Backfills first, then subscribes. The supervisor is disconnected and
    /// every timer dropped on the way out.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            api = %self.client.endpoint(),
            stream = %self.supervisor.description(),
            "Starting watch session"
        );
        self.backfill().await;
        self.poll_status().await;
        self.supervisor.connect();

        let mut status = interval(self.timers.status);
        let mut tick = interval(self.timers.tick);
        let mut report = self.timers.report.map(interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down watch session");
                    break;
                }
                event = self.supervisor.recv() => match event {
                    Some(event) => {
                        self.dashboard.handle_stream_event(event);
                    }
                    None => {
                        debug!("Supervisor stopped, detaching");
                        self.supervisor.disconnect();
                    }
                },
                _ = status.tick() => self.poll_status().await,
                _ = tick.tick() => self.dashboard.tick(Utc::now()),
                _ = next_report(&mut report) => self.report(),
            }
        }

        self.supervisor.disconnect();
        Ok(())
    }

    /// Log the latest row of each selected metric and one line per node.
    pub fn report(&self) {
        let dashboard = &self.dashboard;
        info!(
            connection = %dashboard.connection().label(),
            records = dashboard.buffer().len(),
            nodes = dashboard.known_nodes().len(),
            running = dashboard.tracker().running_count(),
            "Dashboard summary"
        );
        if let Some(banner) = dashboard.banner() {
            info!(kind = %banner.kind, message = %banner.message, "Active error");
        }

        for matrix in dashboard.selected_series() {
            let Some(row) = matrix.latest() else {
                continue;
            };
            let values = row
                .values
                .iter()
                .map(|(node, value)| match value {
                    Some(v) => format!("{node}={v}"),
                    None => format!("{node}=-"),
                })
                .collect::<Vec<_>>()
                .join(" ");
            info!(
                metric = catalog::display_name(&matrix.metric),
                unit = catalog::unit(&matrix.metric),
                mode = %matrix.mode,
                at = %row.label,
                "{values}"
            );
        }

        for node in dashboard.node_summaries() {
            info!(
                node = %node.name,
                state = %node.state,
                uptime = %node.uptime,
                round = ?node.current_round,
                eta = node.eta.as_deref().unwrap_or("--"),
                "Node"
            );
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.supervisor.disconnect();
    }
}

fn interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_report(report: &mut Option<Interval>) {
    match report {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
