//! Node lifecycle control requests.

/// Largest node count the manager accepts in one start request.
pub const MAX_NODES: u32 = 10;

/// Body of `POST /nodes/start`.
///
/// Defaults match the manager's own settings: 5 nodes, 10 rounds, mixing
/// disabled with λ = 0.5 and μ = 0.2.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StartRequest {
    /// Number of nodes to start.
    pub count: u32,
    /// Training rounds each node runs.
    pub rounds: u32,
    /// Whether nodes stream metric updates as they happen.
    pub stream: bool,
    /// Nodes that join mid-simulation.
    pub join: u32,
    /// Nodes that exit mid-simulation.
    pub exit: u32,
    /// Whether mixnet message mixing is enabled.
    pub mixing: bool,
    /// Mixing send rate.
    pub mixing_lambda: f64,
    /// Mixing delay rate.
    pub mixing_mu: f64,
}

impl Default for StartRequest {
    fn default() -> Self {
        Self {
            count: 5,
            rounds: 10,
            stream: false,
            join: 0,
            exit: 0,
            mixing: false,
            mixing_lambda: 0.5,
            mixing_mu: 0.2,
        }
    }
}

impl StartRequest {
    /// A default request for `count` nodes, clamped to `1..=MAX_NODES`.
    pub fn with_count(count: u32) -> Self {
        Self {
            count,
            ..Self::default()
        }
        .clamped()
    }

    /// Set the number of rounds.
    pub fn rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds;
        self
    }

    /// Clamp `count` to what the manager accepts.
    pub fn clamped(mut self) -> Self {
        self.count = self.count.clamp(1, MAX_NODES);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_is_clamped() {
        assert_eq!(StartRequest::with_count(0).count, 1);
        assert_eq!(StartRequest::with_count(4).count, 4);
        assert_eq!(StartRequest::with_count(50).count, MAX_NODES);
    }

    #[test]
    fn defaults_match_manager() {
        let req = StartRequest::default().rounds(3);
        assert_eq!(req.count, 5);
        assert_eq!(req.rounds, 3);
        assert!(!req.mixing);
        assert_eq!(req.mixing_lambda, 0.5);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serializes_flat_body() {
        let json = serde_json::to_value(StartRequest::with_count(3)).unwrap();
        assert_eq!(json["count"], 3);
        assert_eq!(json["mixing_mu"], 0.2);
    }
}
