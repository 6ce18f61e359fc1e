use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use nodewatch::{DisplayMode, Session, Settings};
use nodewatch_client::StartRequest;

#[derive(Parser, Debug)]
#[command(name = "nodewatch")]
#[command(about = "Live metrics dashboard for a simulated node network")]
struct Args {
    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node manager API base URL
    #[arg(long)]
    api: Option<String>,

    /// Metrics stream URL (ws:// or wss://)
    #[arg(long)]
    stream: Option<String>,

    /// Metric to chart (repeatable; defaults to the always-active set)
    #[arg(short, long = "metric")]
    metrics: Vec<String>,

    /// Display transform: raw, delta, rate or normalized
    #[arg(long)]
    mode: Option<DisplayMode>,

    /// Rows kept per chart (0 keeps everything)
    #[arg(long)]
    window: Option<usize>,

    /// Status poll interval (e.g. "2s"; clamped to 1s-10s)
    #[arg(long)]
    status_interval: Option<String>,

    /// Start this many nodes before watching
    #[arg(long, value_name = "COUNT", conflicts_with_all = ["stop", "clear"])]
    start: Option<u32>,

    /// Rounds per node, sent with --start and used for progress and ETA
    #[arg(long)]
    rounds: Option<u32>,

    /// Stop all nodes and exit
    #[arg(long, conflicts_with_all = ["clear", "export"])]
    stop: bool,

    /// Clear the manager's logs and metrics and exit
    #[arg(long, conflicts_with = "export")]
    clear: bool,

    /// Export current series to a JSON file and exit
    #[arg(short, long)]
    export: Option<PathBuf>,

    /// Summary log interval (e.g. "10s"; "0s" disables)
    #[arg(long)]
    report_interval: Option<String>,

    /// Default log level when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Apply command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut Settings) -> Result<()> {
        if let Some(api) = &self.api {
            settings.api_url = api.clone();
        }
        if let Some(stream) = &self.stream {
            settings.stream_url = stream.clone();
        }
        if !self.metrics.is_empty() {
            settings.metrics = self.metrics.clone();
        }
        if let Some(mode) = self.mode {
            settings.display.mode = mode;
        }
        if let Some(window) = self.window {
            settings.display.window = window;
        }
        if let Some(interval) = &self.status_interval {
            settings.status_interval = interval.clone();
        }
        if let Some(interval) = &self.report_interval {
            settings.report_interval = interval.clone();
        }
        if let Some(rounds) = self.rounds {
            settings.rounds = Some(u64::from(rounds));
        }
        settings.validate()
    }

    fn start_request(&self) -> Option<StartRequest> {
        let count = self.start?;
        let mut request = StartRequest::with_count(count);
        if let Some(rounds) = self.rounds {
            request = request.rounds(rounds);
        }
        Some(request)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    let mut settings = Settings::load(args.config.as_deref())?;
    args.apply(&mut settings)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args, settings))
}

fn init_tracing(level: Option<&str>) {
    let level = level.unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("nodewatch={level},nodewatch_client={level}"))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: Args, settings: Settings) -> Result<()> {
    let mut session = Session::from_settings(&settings)?;

    if args.stop {
        let ok = session.stop_nodes().await;
        return finish_control(&session, "stop", ok);
    }
    if args.clear {
        let ok = session.clear_logs().await;
        return finish_control(&session, "clear", ok);
    }
    if let Some(export_path) = &args.export {
        return export_to_file(&mut session, export_path).await;
    }

    if let Some(request) = args.start_request() {
        if !session.restart(&request).await {
            if let Some(banner) = session.dashboard().banner() {
                anyhow::bail!("{banner}");
            }
        }
    }

    session.run(shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C; stop the process to exit");
        std::future::pending::<()>().await;
    }
}

fn finish_control(session: &Session, action: &str, ok: bool) -> Result<()> {
    if !ok {
        match session.dashboard().banner() {
            Some(banner) => anyhow::bail!("{banner}"),
            None => anyhow::bail!("{action} failed"),
        }
    }
    println!("{action}: ok ({})", session.client().endpoint());
    Ok(())
}

/// One-shot backfill and status fetch, written as pretty JSON.
async fn export_to_file(session: &mut Session, export_path: &Path) -> Result<()> {
    if session.backfill().await.is_none() {
        if let Some(banner) = session.dashboard().banner() {
            anyhow::bail!("{banner}");
        }
    }
    session.poll_status().await;
    session.dashboard_mut().tick(Utc::now());

    let dashboard = session.dashboard();
    dashboard.export(export_path)?;

    println!(
        "Exported {} records ({} metrics, {} nodes) to: {}",
        dashboard.buffer().len(),
        dashboard.selected_metrics().len(),
        dashboard.known_nodes().len(),
        export_path.display()
    );
    Ok(())
}
