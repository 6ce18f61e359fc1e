//! Node status as reported by the manager's status endpoint.

/// One node's status at the time of a poll.
///
/// `status` is the raw container state (`running`, `exited`, ...) and
/// `started_at` the raw start time string; the lifecycle tracker parses
/// both.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeStatusSnapshot {
    /// Node name (e.g. `node_3`).
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: String,

    /// Raw status string.
    #[cfg_attr(feature = "serde", serde(default = "unknown_status"))]
    pub status: String,

    /// Raw start time, if the node was ever started.
    #[cfg_attr(feature = "serde", serde(default))]
    pub started_at: Option<String>,
}

#[cfg(feature = "serde")]
fn unknown_status() -> String {
    String::from("unknown")
}

impl NodeStatusSnapshot {
    /// Create a snapshot with no start time.
    pub fn new(name: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: status.into(),
            started_at: None,
        }
    }

    /// Set the start time.
    pub fn started_at(mut self, started_at: impl Into<String>) -> Self {
        self.started_at = Some(started_at.into());
        self
    }
}
