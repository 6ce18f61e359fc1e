//! # nodewatch-types
//!
//! Wire types exchanged between a node-manager service and the nodewatch
//! dashboard core. Everything here mirrors the JSON shapes the manager and
//! its simulated nodes actually produce, which are loosely typed: values may
//! arrive as numbers or numeric strings, ids may be strings or integers, and
//! any field may be missing.
//!
//! These types deliberately do **not** validate. They capture what was on
//! the wire so that the ingestion layer can decide, record by record, what
//! to admit and what to count as malformed.
//!
//! ## Features
//!
//! - `serde`: `Serialize`/`Deserialize` implementations for every type
//!
//! ## Example
//!
//! ```rust
//! use nodewatch_types::{RawMetric, RawValue};
//!
//! let raw = RawMetric::builder()
//!     .timestamp("2024-05-01T10:00:00Z")
//!     .field("msg_sent")
//!     .node("node_0")
//!     .value(RawValue::Number(5.0))
//!     .build();
//!
//! assert_eq!(raw.value.and_then(|v| v.to_finite()), Some(5.0));
//! ```

mod control;
mod envelope;
mod metric;
mod status;

pub use control::*;
pub use envelope::*;
pub use metric::*;
pub use status::*;
