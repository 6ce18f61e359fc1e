//! Raw metric records as emitted by simulated nodes.

use core::fmt;

/// A metric record exactly as it arrived on the wire.
///
/// Every field is optional because producers are not trusted: the manager
/// relays whatever its nodes push. Use [`RawValue::to_finite`] and the
/// ingestion layer of the dashboard to turn this into a validated record.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawMetric {
    /// Explicit record identifier, if the producer assigned one.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub id: Option<RawId>,

    /// ISO-8601 timestamp string (e.g. `2024-05-01T10:00:00.123456+00:00`).
    #[cfg_attr(feature = "serde", serde(default))]
    pub timestamp: Option<String>,

    /// Metric name (e.g. `msg_sent`, `current_round`).
    #[cfg_attr(feature = "serde", serde(default))]
    pub field: Option<String>,

    /// Name of the node that produced the value (e.g. `node_0`).
    #[cfg_attr(feature = "serde", serde(default))]
    pub node: Option<String>,

    /// The measured value.
    #[cfg_attr(feature = "serde", serde(default))]
    pub value: Option<RawValue>,
}

impl RawMetric {
    /// Create a builder for a raw metric.
    pub fn builder() -> RawMetricBuilder {
        RawMetricBuilder::new()
    }
}

/// A metric value before numeric coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// A JSON number.
    Number(f64),
    /// A JSON string, possibly holding a number (`"12.5"`).
    Text(String),
    /// A JSON boolean.
    Bool(bool),
    /// Anything else (arrays, objects).
    Unsupported,
}

impl RawValue {
    /// Coerce to a finite `f64`.
    ///
    /// Numbers pass through, strings are trimmed and parsed. Booleans,
    /// empty strings and structured values are rejected, and so is any
    /// result that is NaN or infinite.
    pub fn to_finite(&self) -> Option<f64> {
        let value = match self {
            RawValue::Number(n) => *n,
            RawValue::Text(s) => {
                let s = s.trim();
                if s.is_empty() {
                    return None;
                }
                s.parse::<f64>().ok()?
            }
            RawValue::Bool(_) | RawValue::Unsupported => return None,
        };
        value.is_finite().then_some(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

/// An explicit record identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RawId {
    /// A string id.
    Text(String),
    /// An integer id.
    Integer(i64),
    /// Any other JSON type; treated as if no id was given.
    Unsupported,
}

impl RawId {
    /// The id in canonical string form, if it is usable as a dedup key.
    pub fn as_key(&self) -> Option<String> {
        match self {
            RawId::Text(s) if !s.is_empty() => Some(s.clone()),
            RawId::Text(_) | RawId::Unsupported => None,
            RawId::Integer(i) => Some(i.to_string()),
        }
    }
}

impl fmt::Display for RawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawId::Text(s) => f.write_str(s),
            RawId::Integer(i) => write!(f, "{}", i),
            RawId::Unsupported => f.write_str("<unsupported>"),
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for `RawMetric`.
#[derive(Debug, Default)]
pub struct RawMetricBuilder {
    inner: RawMetric,
}

impl RawMetricBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an explicit string id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.inner.id = Some(RawId::Text(id.into()));
        self
    }

    /// Set the timestamp string.
    pub fn timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.inner.timestamp = Some(timestamp.into());
        self
    }

    /// Set the metric name.
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.inner.field = Some(field.into());
        self
    }

    /// Set the node name.
    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.inner.node = Some(node.into());
        self
    }

    /// Set the value.
    pub fn value(mut self, value: impl Into<RawValue>) -> Self {
        self.inner.value = Some(value.into());
        self
    }

    /// Build the raw metric.
    pub fn build(self) -> RawMetric {
        self.inner
    }
}

// ============================================================================
// Serde
// ============================================================================

#[cfg(feature = "serde")]
mod serde_impl {
    use core::fmt;

    use serde::de::{self, IgnoredAny, MapAccess, SeqAccess, Visitor};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{RawId, RawValue};

    impl Serialize for RawValue {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self {
                RawValue::Number(n) => serializer.serialize_f64(*n),
                RawValue::Text(s) => serializer.serialize_str(s),
                RawValue::Bool(b) => serializer.serialize_bool(*b),
                RawValue::Unsupported => serializer.serialize_unit(),
            }
        }
    }

    impl<'de> Deserialize<'de> for RawValue {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserializer.deserialize_any(RawValueVisitor)
        }
    }

    struct RawValueVisitor;

    impl<'de> Visitor<'de> for RawValueVisitor {
        type Value = RawValue;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a metric value")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<RawValue, E> {
            Ok(RawValue::Number(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<RawValue, E> {
            Ok(RawValue::Number(v as f64))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<RawValue, E> {
            Ok(RawValue::Number(v as f64))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<RawValue, E> {
            Ok(RawValue::Text(v.to_string()))
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<RawValue, E> {
            Ok(RawValue::Text(v))
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<RawValue, E> {
            Ok(RawValue::Bool(v))
        }

        fn visit_unit<E: de::Error>(self) -> Result<RawValue, E> {
            Ok(RawValue::Unsupported)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<RawValue, A::Error> {
            while seq.next_element::<IgnoredAny>()?.is_some() {}
            Ok(RawValue::Unsupported)
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawValue, A::Error> {
            while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
            Ok(RawValue::Unsupported)
        }
    }

    impl Serialize for RawId {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self {
                RawId::Text(s) => serializer.serialize_str(s),
                RawId::Integer(i) => serializer.serialize_i64(*i),
                RawId::Unsupported => serializer.serialize_unit(),
            }
        }
    }

    impl<'de> Deserialize<'de> for RawId {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserializer.deserialize_any(RawIdVisitor)
        }
    }

    struct RawIdVisitor;

    impl<'de> Visitor<'de> for RawIdVisitor {
        type Value = RawId;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a record id")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<RawId, E> {
            Ok(RawId::Integer(v))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<RawId, E> {
            Ok(i64::try_from(v).map_or(RawId::Text(v.to_string()), RawId::Integer))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<RawId, E> {
            Ok(RawId::Text(v.to_string()))
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<RawId, E> {
            Ok(RawId::Text(v))
        }

        fn visit_f64<E: de::Error>(self, _: f64) -> Result<RawId, E> {
            Ok(RawId::Unsupported)
        }

        fn visit_bool<E: de::Error>(self, _: bool) -> Result<RawId, E> {
            Ok(RawId::Unsupported)
        }

        fn visit_unit<E: de::Error>(self) -> Result<RawId, E> {
            Ok(RawId::Unsupported)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<RawId, A::Error> {
            while seq.next_element::<IgnoredAny>()?.is_some() {}
            Ok(RawId::Unsupported)
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawId, A::Error> {
            while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
            Ok(RawId::Unsupported)
        }
    }
}
