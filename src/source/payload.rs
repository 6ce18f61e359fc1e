//! Inbound stream payload decoding.

use serde_json::Value;
use thiserror::Error;

use nodewatch_types::Batch;

/// Why an inbound message was discarded. Never fatal to the connection.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PayloadError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("payload is not an array of records")]
    NotArray,
}

/// Decode one stream message into a batch of raw records.
///
/// Accepts a bare JSON array or an object wrapping it as `{"data": [...]}`.
/// The records themselves are not validated here.
pub fn decode_batch(text: &str) -> Result<Vec<Value>, PayloadError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| PayloadError::InvalidJson(e.to_string()))?;
    serde_json::from_value::<Batch<Value>>(value)
        .map(Batch::into_items)
        .map_err(|_| PayloadError::NotArray)
}
