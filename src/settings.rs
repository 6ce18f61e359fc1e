//! Layered settings.
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. An optional TOML file (`--config`)
//! 3. `NODEWATCH_*` environment variables, nested keys joined with `__`
//!    (`NODEWATCH_BACKOFF__BASE_MS=500`)
//!
//! Command-line flags are applied on top by the binary.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::warn;

use crate::data::catalog;
use crate::data::duration::parse_duration;
use crate::data::{DisplayMode, SeriesOptions};
use crate::source::Backoff;

const ENV_PREFIX: &str = "NODEWATCH";

/// Allowed range for the status poll interval.
pub const MIN_STATUS_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_STATUS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the node manager API.
    pub api_url: String,
    /// Push channel URL.
    pub stream_url: String,
    pub status_interval: String,
    pub tick_interval: String,
    pub request_timeout: String,
    /// How often the session logs a summary; `"0s"` disables it.
    pub report_interval: String,
    pub backoff: BackoffSettings,
    pub display: DisplaySettings,
    /// Selected metric keys.
    pub metrics: Vec<String>,
    /// Rounds each node runs, for progress and ETA when no start is issued.
    pub rounds: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            stream_url: "ws://localhost:8000/metrics/ws".to_string(),
            status_interval: "2s".to_string(),
            tick_interval: "1s".to_string(),
            request_timeout: "10s".to_string(),
            report_interval: "10s".to_string(),
            backoff: BackoffSettings::default(),
            display: DisplaySettings::default(),
            metrics: catalog::default_selection(),
            rounds: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub mode: DisplayMode,
    /// Rows kept per chart; 0 keeps everything.
    pub window: usize,
    /// Decimal places.
    pub precision: Option<u32>,
    pub local_time: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            mode: DisplayMode::Raw,
            window: 50,
            precision: Some(4),
            local_time: true,
        }
    }
}

impl Settings {
    /// Load settings from defaults, an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("metrics")
                    .source(env),
            )
            .build()
            .context("Failed to read settings")?;

        let settings: Settings = config
            .try_deserialize()
            .context("Invalid settings")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check every value that is parsed lazily.
    pub fn validate(&self) -> Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            bail!("api_url must be an http(s) URL: {}", self.api_url);
        }
        if !self.stream_url.starts_with("ws://") && !self.stream_url.starts_with("wss://") {
            bail!("stream_url must be a ws(s) URL: {}", self.stream_url);
        }
        self.status_interval()?;
        self.report_interval()?;
        self.request_timeout()?;
        if self.tick_interval()?.is_zero() {
            bail!("tick_interval must be greater than zero");
        }
        if self.rounds == Some(0) {
            bail!("rounds must be greater than zero");
        }
        if self.backoff.base_ms == 0 || self.backoff.max_ms < self.backoff.base_ms {
            bail!(
                "backoff must satisfy 0 < base_ms <= max_ms (got {} / {})",
                self.backoff.base_ms,
                self.backoff.max_ms
            );
        }
        Ok(())
    }

    /// Status poll interval, clamped to 1–10 s.
    pub fn status_interval(&self) -> Result<Duration> {
        let interval = parse_setting("status_interval", &self.status_interval)?;
        let clamped = interval.clamp(MIN_STATUS_INTERVAL, MAX_STATUS_INTERVAL);
        if clamped != interval {
            warn!(
                requested = %self.status_interval,
                used_secs = clamped.as_secs(),
                "Status interval out of range, clamping"
            );
        }
        Ok(clamped)
    }

    pub fn tick_interval(&self) -> Result<Duration> {
        parse_setting("tick_interval", &self.tick_interval)
    }

    pub fn request_timeout(&self) -> Result<Duration> {
        parse_setting("request_timeout", &self.request_timeout)
    }

    /// `None` when reporting is disabled.
    pub fn report_interval(&self) -> Result<Option<Duration>> {
        let interval = parse_setting("report_interval", &self.report_interval)?;
        Ok((!interval.is_zero()).then_some(interval))
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.backoff.base_ms),
            max: Duration::from_millis(self.backoff.max_ms),
        }
    }

    pub fn series_options(&self) -> SeriesOptions {
        SeriesOptions {
            mode: self.display.mode,
            window: (self.display.window > 0).then_some(self.display.window),
            precision: self.display.precision,
            local_time: self.display.local_time,
        }
    }
}

fn parse_setting(name: &str, value: &str) -> Result<Duration> {
    parse_duration(value).with_context(|| format!("Invalid {name}: {value:?}"))
}
