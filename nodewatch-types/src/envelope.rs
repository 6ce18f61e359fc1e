//! Response envelopes.
//!
//! The manager and the stream are not consistent about wrapping arrays:
//! the same list may arrive bare or inside an object.

use crate::NodeStatusSnapshot;

/// A list of items, either bare or wrapped as `{"data": [...]}`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Batch<T> {
    /// `[...]`
    Bare(Vec<T>),
    /// `{"data": [...]}`
    Wrapped {
        /// Wrapped items.
        data: Vec<T>,
    },
}

impl<T> Batch<T> {
    /// Unwrap into the item list.
    pub fn into_items(self) -> Vec<T> {
        match self {
            Batch::Bare(items) | Batch::Wrapped { data: items } => items,
        }
    }
}

/// Status endpoint response, either bare or wrapped as `{"node_status": [...]}`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum StatusResponse {
    /// `[...]`
    Bare(Vec<NodeStatusSnapshot>),
    /// `{"node_status": [...]}`
    Wrapped {
        /// Wrapped snapshots.
        node_status: Vec<NodeStatusSnapshot>,
    },
}

impl StatusResponse {
    /// Unwrap into the snapshot list.
    pub fn into_snapshots(self) -> Vec<NodeStatusSnapshot> {
        match self {
            StatusResponse::Bare(s) | StatusResponse::Wrapped { node_status: s } => s,
        }
    }
}
