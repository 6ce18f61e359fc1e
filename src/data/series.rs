//! Time-series assembly.
//!
//! Builds chart-ready matrices from the event log: one row per distinct
//! instant, one column per known node, `null` where a node reported nothing
//! in that bucket. Pure with respect to the log; safe to call on every
//! render or report tick.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use super::record::MetricRecord;

/// Key a serialized row uses for its time label. No node may take this name.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Per-node value transform applied before bucketing into rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Values as reported.
    #[default]
    Raw,
    /// Change since the node's previous observation (0 for the first).
    /// Results beyond the `f64` range saturate to `±f64::MAX`.
    Delta,
    /// Delta divided by seconds since the node's previous observation,
    /// saturating like [`DisplayMode::Delta`].
    Rate,
    /// Value divided by the node's largest absolute value, in `[-1, 1]`.
    Normalized,
}

impl DisplayMode {
    pub fn label(&self) -> &'static str {
        match self {
            DisplayMode::Raw => "raw",
            DisplayMode::Delta => "delta",
            DisplayMode::Rate => "rate",
            DisplayMode::Normalized => "normalized",
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(DisplayMode::Raw),
            "delta" => Ok(DisplayMode::Delta),
            "rate" => Ok(DisplayMode::Rate),
            "normalized" | "normalised" => Ok(DisplayMode::Normalized),
            other => Err(format!(
                "unknown display mode '{}' (expected raw, delta, rate or normalized)",
                other
            )),
        }
    }
}

/// How a matrix is built.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesOptions {
    pub mode: DisplayMode,
    /// Keep only the most recent `window` rows.
    pub window: Option<usize>,
    /// Round values to this many decimal places.
    pub precision: Option<u32>,
    /// Label rows in local time rather than UTC.
    pub local_time: bool,
}

impl Default for SeriesOptions {
    fn default() -> Self {
        Self {
            mode: DisplayMode::Raw,
            window: Some(50),
            precision: Some(4),
            local_time: true,
        }
    }
}

/// One bucket: every record sharing an exact instant.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRow {
    pub at: DateTime<Utc>,
    pub label: String,
    /// One entry per column, in column order.
    pub values: BTreeMap<String, Option<f64>>,
}

impl SeriesRow {
    pub fn get(&self, node: &str) -> Option<f64> {
        self.values.get(node).copied().flatten()
    }
}

impl Serialize for SeriesRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + 1))?;
        map.serialize_entry(TIMESTAMP_KEY, &self.label)?;
        for (node, value) in &self.values {
            map.serialize_entry(node, value)?;
        }
        map.end()
    }
}

/// Output of [`build_series`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesMatrix {
    pub metric: String,
    pub mode: DisplayMode,
    /// Column order.
    pub nodes: Vec<String>,
    pub rows: Vec<SeriesRow>,
}

impl SeriesMatrix {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn latest(&self) -> Option<&SeriesRow> {
        self.rows.last()
    }

    /// One node's column, top to bottom.
    pub fn column(&self, node: &str) -> Vec<Option<f64>> {
        self.rows.iter().map(|row| row.get(node)).collect()
    }
}

/// Build the matrix for `metric` with columns `nodes`.
///
/// Records for nodes outside `nodes` are ignored, and a node named
/// [`TIMESTAMP_KEY`] never becomes a column. When several admitted
/// records share a bucket and node, the one with the greatest dedup key is
/// used, so the result does not depend on arrival order. Transforms run over
/// the whole filtered log before the window is applied.
pub fn build_series(
    records: &[MetricRecord],
    metric: &str,
    nodes: &BTreeSet<String>,
    options: &SeriesOptions,
) -> SeriesMatrix {
    let columns: Vec<&String> = nodes
        .iter()
        .filter(|node| node.as_str() != TIMESTAMP_KEY)
        .collect();

    // (instant, node) -> winning record
    let mut cells: BTreeMap<(DateTime<Utc>, &str), &MetricRecord> = BTreeMap::new();
    for record in records {
        if record.field() != metric || !nodes.contains(record.node()) {
            continue;
        }
        cells
            .entry((record.timestamp(), record.node()))
            .and_modify(|current| {
                if record.key() > current.key() {
                    *current = record;
                }
            })
            .or_insert(record);
    }

    // Per-node observations in chronological order.
    let mut per_node: BTreeMap<&str, Vec<(DateTime<Utc>, f64)>> = BTreeMap::new();
    for ((at, node), record) in &cells {
        per_node.entry(*node).or_default().push((*at, record.value()));
    }

    let mut buckets: BTreeMap<DateTime<Utc>, BTreeMap<&str, f64>> = BTreeMap::new();
    for (node, observations) in &per_node {
        for (at, value) in transform(observations, options.mode) {
            buckets.entry(at).or_default().insert(*node, value);
        }
    }

    let mut rows: Vec<SeriesRow> = buckets
        .into_iter()
        .map(|(at, present)| SeriesRow {
            at,
            label: time_label(at, options.local_time),
            values: columns
                .iter()
                .map(|&node| {
                    let value = present
                        .get(node.as_str())
                        .map(|v| round_to(*v, options.precision));
                    (node.clone(), value)
                })
                .collect(),
        })
        .collect();

    if let Some(window) = options.window {
        if rows.len() > window {
            rows.drain(..rows.len() - window);
        }
    }

    SeriesMatrix {
        metric: metric.to_string(),
        mode: options.mode,
        nodes: columns.into_iter().cloned().collect(),
        rows,
    }
}

/// Apply a transform to one node's chronological observations.
fn transform(
    observations: &[(DateTime<Utc>, f64)],
    mode: DisplayMode,
) -> Vec<(DateTime<Utc>, f64)> {
    match mode {
        DisplayMode::Raw => observations.to_vec(),
        DisplayMode::Delta | DisplayMode::Rate => {
            let mut previous: Option<(DateTime<Utc>, f64)> = None;
            observations
                .iter()
                .map(|&(at, value)| {
                    let out = saturate(match previous {
                        None => 0.0,
                        Some((prev_at, prev_value)) => {
                            let delta = value - prev_value;
                            if mode == DisplayMode::Delta {
                                delta
                            } else {
                                let micros = (at - prev_at).num_microseconds().unwrap_or(0);
                                let seconds = micros as f64 / 1_000_000.0;
                                if seconds > 0.0 {
                                    delta / seconds
                                } else {
                                    0.0
                                }
                            }
                        }
                    });
                    previous = Some((at, value));
                    (at, out)
                })
                .collect()
        }
        DisplayMode::Normalized => {
            let max = observations
                .iter()
                .map(|(_, v)| v.abs())
                .fold(0.0_f64, f64::max);
            observations
                .iter()
                .map(|&(at, value)| (at, if max > 0.0 { value / max } else { 0.0 }))
                .collect()
        }
    }
}

/// Clamp an overflowed result to the largest finite value of the same sign.
fn saturate(value: f64) -> f64 {
    if value.is_infinite() {
        f64::MAX.copysign(value)
    } else {
        value
    }
}

fn round_to(value: f64, precision: Option<u32>) -> f64 {
    match precision {
        Some(places) => {
            let factor = 10f64.powi(places.min(15) as i32);
            let rounded = (value * factor).round() / factor;
            if rounded.is_finite() {
                rounded
            } else {
                value
            }
        }
        None => value,
    }
}

/// `HH:MM:SS` label for a bucket.
pub fn time_label(at: DateTime<Utc>, local_time: bool) -> String {
    if local_time {
        at.with_timezone(&Local).format("%H:%M:%S").to_string()
    } else {
        at.format("%H:%M:%S").to_string()
    }
}
