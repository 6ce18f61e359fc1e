//! # nodewatch-client
//!
//! Async client for the node-manager HTTP API consumed by the nodewatch
//! dashboard:
//!
//! - `GET /nodes/status`: current node status snapshots
//! - `GET /metrics`: historical metrics for the initial backfill
//! - `POST /nodes/start`, `POST /nodes/stop`, `POST /logs/clear`: lifecycle control
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nodewatch_client::ControlClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ControlClient::builder()
//!         .endpoint("http://localhost:8000")
//!         .timeout(Duration::from_secs(5))
//!         .build()?;
//!
//!     for node in client.fetch_status().await? {
//!         println!("{}: {}", node.name, node.status);
//!     }
//!     Ok(())
//! }
//! ```

mod client;
pub mod error;

pub use client::{ControlClient, ControlClientBuilder};
pub use error::ClientError;

// Re-export types for convenience
pub use nodewatch_types::{NodeStatusSnapshot, StartRequest, MAX_NODES};
