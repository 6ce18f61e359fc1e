//! Validated metric records.
//!
//! Everything downstream of ingestion works with [`MetricRecord`]; the loose
//! wire shape ([`RawMetric`]) never leaves this module.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::Deserialize;
use thiserror::Error;

use nodewatch_types::RawMetric;

use super::series::TIMESTAMP_KEY;

/// Why a raw record was not admitted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record has an invalid shape: {0}")]
    Shape(String),

    #[error("missing required field '{0}'")]
    Missing(&'static str),

    #[error("unparsable timestamp '{0}'")]
    BadTimestamp(String),

    #[error("value is not a finite number")]
    BadValue,

    #[error("node name '{0}' is reserved")]
    ReservedNode(String),
}

/// Identity used to admit a record at most once.
///
/// Ordering is total so that conflicting records can be resolved
/// deterministically regardless of arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DedupKey {
    /// Explicit id assigned by the producer.
    Id(String),
    /// `(instant, field, node)`; two spellings of one instant are one key.
    Derived {
        at: DateTime<Utc>,
        field: String,
        node: String,
    },
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupKey::Id(id) => f.write_str(id),
            DedupKey::Derived { at, field, node } => write!(
                f,
                "{}|{}|{}",
                at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                field,
                node
            ),
        }
    }
}

/// A validated, immutable metric observation.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    key: DedupKey,
    timestamp: DateTime<Utc>,
    field: String,
    node: String,
    value: f64,
}

impl MetricRecord {
    /// Build a record directly from validated parts, with a derived key.
    pub fn new(
        timestamp: DateTime<Utc>,
        field: impl Into<String>,
        node: impl Into<String>,
        value: f64,
    ) -> Result<Self, RecordError> {
        if !value.is_finite() {
            return Err(RecordError::BadValue);
        }
        let field = field.into();
        let node = node.into();
        if field.is_empty() {
            return Err(RecordError::Missing("field"));
        }
        if node.is_empty() {
            return Err(RecordError::Missing("node"));
        }
        if node == TIMESTAMP_KEY {
            return Err(RecordError::ReservedNode(node));
        }
        Ok(Self {
            key: DedupKey::Derived {
                at: timestamp,
                field: field.clone(),
                node: node.clone(),
            },
            timestamp,
            field,
            node,
            value,
        })
    }

    /// Validate one element of an inbound batch.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, RecordError> {
        if !value.is_object() {
            return Err(RecordError::NotAnObject);
        }
        let raw = RawMetric::deserialize(value).map_err(|e| RecordError::Shape(e.to_string()))?;
        Self::from_raw(raw)
    }

    /// Validate a raw metric.
    pub fn from_raw(raw: RawMetric) -> Result<Self, RecordError> {
        let timestamp = raw.timestamp.ok_or(RecordError::Missing("timestamp"))?;
        let field = raw
            .field
            .filter(|f| !f.is_empty())
            .ok_or(RecordError::Missing("field"))?;
        let node = raw
            .node
            .filter(|n| !n.is_empty())
            .ok_or(RecordError::Missing("node"))?;
        let value = raw
            .value
            .ok_or(RecordError::Missing("value"))?
            .to_finite()
            .ok_or(RecordError::BadValue)?;
        let at = parse_timestamp(&timestamp).ok_or(RecordError::BadTimestamp(timestamp))?;

        let mut record = Self::new(at, field, node, value)?;
        if let Some(id) = raw.id.as_ref().and_then(|id| id.as_key()) {
            record.key = DedupKey::Id(id);
        }
        Ok(record)
    }

    pub fn key(&self) -> &DedupKey {
        &self.key
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts RFC 3339 with `Z` or a numeric offset and any fractional
/// precision. A date-time without an offset is taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Parse a node start time; the container runtime's zero time means "never".
pub fn parse_start_time(s: &str) -> Option<DateTime<Utc>> {
    parse_timestamp(s).filter(|dt| dt.year() > 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_timestamp_forms() {
        let z = parse_timestamp("2024-05-01T10:00:00Z").unwrap();
        let offset = parse_timestamp("2024-05-01T10:00:00+00:00").unwrap();
        let micros = parse_timestamp("2024-05-01T10:00:00.000000+00:00").unwrap();
        let shifted = parse_timestamp("2024-05-01T12:00:00+02:00").unwrap();
        let naive = parse_timestamp("2024-05-01T10:00:00").unwrap();
        assert_eq!(z, offset);
        assert_eq!(z, micros);
        assert_eq!(z, shifted);
        assert_eq!(z, naive);
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_zero_start_time_is_absent() {
        assert!(parse_start_time("0001-01-01T00:00:00Z").is_none());
        assert!(parse_start_time("2024-05-01T10:00:00.123456789Z").is_some());
    }

    #[test]
    fn test_valid_record() {
        let record = MetricRecord::from_value(&json!({
            "timestamp": "2024-05-01T10:00:00Z",
            "field": "msg_sent",
            "node": "node_0",
            "value": "5"
        }))
        .unwrap();
        assert_eq!(record.field(), "msg_sent");
        assert_eq!(record.node(), "node_0");
        assert_eq!(record.value(), 5.0);
        assert_eq!(
            record.key().to_string(),
            "2024-05-01T10:00:00Z|msg_sent|node_0"
        );
    }

    #[test]
    fn test_explicit_id_wins() {
        let int_id = MetricRecord::from_value(&json!({
            "id": 17,
            "timestamp": "2024-05-01T10:00:00Z",
            "field": "errors",
            "node": "node_1",
            "value": 0
        }))
        .unwrap();
        assert_eq!(int_id.key(), &DedupKey::Id("17".to_string()));

        let odd_id = MetricRecord::from_value(&json!({
            "id": {"nested": true},
            "timestamp": "2024-05-01T10:00:00Z",
            "field": "errors",
            "node": "node_1",
            "value": 0
        }))
        .unwrap();
        assert!(matches!(odd_id.key(), DedupKey::Derived { .. }));
    }

    #[test]
    fn test_equivalent_timestamps_share_a_key() {
        let a = MetricRecord::from_value(&json!({
            "timestamp": "2024-05-01T10:00:00Z", "field": "f", "node": "n", "value": 1
        }))
        .unwrap();
        let b = MetricRecord::from_value(&json!({
            "timestamp": "2024-05-01T10:00:00.000+00:00", "field": "f", "node": "n", "value": 1
        }))
        .unwrap();
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_malformed_records() {
        let cases = [
            (json!("text"), RecordError::NotAnObject),
            (
                json!({"field": "f", "node": "n", "value": 1}),
                RecordError::Missing("timestamp"),
            ),
            (
                json!({"timestamp": "2024-05-01T10:00:00Z", "field": "", "node": "n", "value": 1}),
                RecordError::Missing("field"),
            ),
            (
                json!({"timestamp": "2024-05-01T10:00:00Z", "field": "f", "value": 1}),
                RecordError::Missing("node"),
            ),
            (
                json!({"timestamp": "2024-05-01T10:00:00Z", "field": "f", "node": "n"}),
                RecordError::Missing("value"),
            ),
            (
                json!({"timestamp": "2024-05-01T10:00:00Z", "field": "f", "node": "n", "value": "abc"}),
                RecordError::BadValue,
            ),
            (
                json!({"timestamp": "2024-05-01T10:00:00Z", "field": "f", "node": "n", "value": true}),
                RecordError::BadValue,
            ),
            (
                json!({"timestamp": "soon", "field": "f", "node": "n", "value": 1}),
                RecordError::BadTimestamp("soon".to_string()),
            ),
        ];

        for (input, expected) in cases {
            assert_eq!(MetricRecord::from_value(&input).unwrap_err(), expected, "{input}");
        }

        let wrong_type = json!({"timestamp": "2024-05-01T10:00:00Z", "field": 3, "node": "n", "value": 1});
        assert!(matches!(
            MetricRecord::from_value(&wrong_type),
            Err(RecordError::Shape(_))
        ));
    }

    #[test]
    fn test_new_rejects_non_finite() {
        let at = parse_timestamp("2024-05-01T10:00:00Z").unwrap();
        assert_eq!(
            MetricRecord::new(at, "f", "n", f64::NAN).unwrap_err(),
            RecordError::BadValue
        );
    }

    #[test]
    fn test_node_named_like_the_row_label_is_rejected() {
        let record = json!({
            "timestamp": "2024-05-01T10:00:00Z",
            "field": "f",
            "node": "timestamp",
            "value": 3
        });
        assert_eq!(
            MetricRecord::from_value(&record).unwrap_err(),
            RecordError::ReservedNode("timestamp".to_string())
        );
    }
}
