//! Node lifecycle tracking.
//!
//! Turns discretely polled status snapshots into a continuously ticking
//! uptime view. Snapshots set the running flag and start time; the local
//! clock (`tick`) is the only thing that advances `elapsed`. Once a node
//! stops running its elapsed time stays where the last tick left it.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use nodewatch_types::NodeStatusSnapshot;

use super::duration::format_uptime;
use super::record::parse_start_time;

/// A node's state as last reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    Running,
    Stopped,
    Unknown,
    /// Any other container state (`created`, `paused`, ...), lowercased.
    Other(String),
}

impl NodeState {
    /// Parse a raw status string, case-insensitively.
    pub fn parse(status: &str) -> Self {
        let status = status.trim().to_ascii_lowercase();
        match status.as_str() {
            "running" => NodeState::Running,
            "stopped" | "exited" | "dead" => NodeState::Stopped,
            "" | "unknown" => NodeState::Unknown,
            _ => NodeState::Other(status),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, NodeState::Running)
    }

    /// Short label for display.
    pub fn label(&self) -> &str {
        match self {
            NodeState::Running => "running",
            NodeState::Stopped => "stopped",
            NodeState::Unknown => "unknown",
            NodeState::Other(s) => s,
        }
    }
}

/// Uptime state for one known node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUptime {
    pub node: String,
    pub start_time: Option<DateTime<Utc>>,
    pub state: NodeState,
    pub elapsed: Duration,
}

impl NodeUptime {
    fn new(node: &str) -> Self {
        Self {
            node: node.to_string(),
            start_time: None,
            state: NodeState::Unknown,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.elapsed.as_millis()
    }

    /// Uptime label, or `"--"` when the node is not running.
    pub fn uptime_label(&self) -> String {
        if self.is_running() {
            format_uptime(self.elapsed)
        } else {
            "--".to_string()
        }
    }
}

/// Summary of what one snapshot changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotChanges {
    /// Nodes seen for the first time.
    pub discovered: Vec<String>,
    /// Nodes that went from running to not running.
    pub stopped: Vec<String>,
    /// Known nodes missing from the snapshot.
    pub missing: Vec<String>,
}

/// Per-node uptime map. The only writer of [`NodeUptime`] state.
#[derive(Debug, Default)]
pub struct NodeTracker {
    nodes: BTreeMap<String, NodeUptime>,
}

impl NodeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node name seen in metrics. Returns true if it was new.
    pub fn observe(&mut self, node: &str) -> bool {
        if node.is_empty() || self.nodes.contains_key(node) {
            return false;
        }
        debug!(node, "Discovered node from metrics");
        self.nodes.insert(node.to_string(), NodeUptime::new(node));
        true
    }

    /// Apply one status poll.
    ///
    /// Elapsed time is never recomputed here; only [`tick`](Self::tick) does
    /// that. Nodes absent from the snapshot are kept but marked unknown.
    pub fn apply_snapshot(&mut self, snapshots: &[NodeStatusSnapshot]) -> SnapshotChanges {
        let mut changes = SnapshotChanges::default();
        let mut reported = BTreeSet::new();

        for snap in snapshots {
            if snap.name.is_empty() {
                continue;
            }
            reported.insert(snap.name.as_str());

            let entry = self.nodes.entry(snap.name.clone()).or_insert_with(|| {
                changes.discovered.push(snap.name.clone());
                NodeUptime::new(&snap.name)
            });

            let state = NodeState::parse(&snap.status);
            if entry.is_running() && !state.is_running() {
                changes.stopped.push(snap.name.clone());
            }
            entry.state = state;

            if let Some(start) = snap.started_at.as_deref().and_then(parse_start_time) {
                entry.start_time = Some(start);
            }
        }

        for (name, uptime) in self.nodes.iter_mut() {
            if reported.contains(name.as_str()) {
                continue;
            }
            if uptime.is_running() {
                changes.stopped.push(name.clone());
            }
            if uptime.state != NodeState::Unknown {
                changes.missing.push(name.clone());
            }
            uptime.state = NodeState::Unknown;
        }

        for name in &changes.stopped {
            if let Some(uptime) = self.nodes.get(name) {
                info!(
                    node = %name,
                    state = uptime.state.label(),
                    uptime = %format_uptime(uptime.elapsed),
                    "Node stopped"
                );
            }
        }

        changes
    }

    /// Advance the local clock: recompute elapsed for running nodes only.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        for uptime in self.nodes.values_mut() {
            if !uptime.is_running() {
                continue;
            }
            if let Some(start) = uptime.start_time {
                uptime.elapsed = (now - start).to_std().unwrap_or(Duration::ZERO);
            }
        }
    }

    /// Forget every node. Only called on an explicit reset.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub fn get(&self, node: &str) -> Option<&NodeUptime> {
        self.nodes.get(node)
    }

    /// Nodes in name order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeUptime> {
        self.nodes.values()
    }

    /// The sorted set of known node names.
    pub fn names(&self) -> BTreeSet<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.nodes.values().filter(|u| u.is_running()).count()
    }
}

/// Estimated time left: `elapsed * (total - current) / current`.
///
/// `None` until at least one round has completed, and once the last round
/// has been reached.
pub fn estimate_remaining(
    elapsed: Duration,
    current_round: u64,
    total_rounds: u64,
) -> Option<Duration> {
    if current_round == 0 || current_round >= total_rounds {
        return None;
    }
    let remaining = total_rounds - current_round;
    Some(elapsed.mul_f64(remaining as f64 / current_round as f64))
}

/// Round progress as a percentage in `0..=100`.
pub fn progress_percent(current_round: f64, total_rounds: u64) -> f64 {
    if total_rounds == 0 || !current_round.is_finite() {
        return 0.0;
    }
    (current_round / total_rounds as f64 * 100.0).clamp(0.0, 100.0)
}
