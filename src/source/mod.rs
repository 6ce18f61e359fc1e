//! Live metrics subscription.
//!
//! This module owns the push channel to the metrics service: how a
//! connection is opened ([`transport`]), how pushed messages are decoded
//! ([`payload`]), and how the subscription is kept alive across failures
//! ([`supervisor`]).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nodewatch::source::{Backoff, StreamEvent, Supervisor, WebSocketConnector};
//!
//! # tokio_test::block_on(async {
//! let connector = Arc::new(WebSocketConnector::new("ws://localhost:8000/metrics/ws"));
//! let mut supervisor = Supervisor::new(connector, Backoff::default());
//! supervisor.connect();
//! while let Some(event) = supervisor.recv().await {
//!     if let StreamEvent::Batch(batch) = event {
//!         println!("{} records", batch.len());
//!     }
//! }
//! # });
//! ```

pub mod payload;
pub mod supervisor;
pub mod transport;

pub use payload::{decode_batch, PayloadError};
pub use supervisor::{Backoff, ConnectionState, Phase, StreamEvent, Supervisor};
pub use transport::{Connection, Connector, TransportError, WebSocketConnector};
