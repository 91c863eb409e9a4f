//! Raw documents as returned by the remote store
//!
//! A [`Document`] is an id plus an untyped field map. Nothing downstream of
//! ingestion looks at it; see [`crate::SchemaRecord::from_document`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Untyped remote record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document id within its collection
    pub id: String,
    /// Field map
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Server-side creation time, when the store reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
}

impl Document {
    /// Create a document with no fields
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
            create_time: None,
        }
    }

    /// Create from an existing JSON object
    ///
    /// Non-object values produce an empty field map.
    #[must_use]
    pub fn from_value(id: impl Into<String>, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            fields,
            create_time: None,
        }
    }

    /// Builder: set a field
    #[inline]
    #[must_use]
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Builder: set the server creation time
    #[inline]
    #[must_use]
    pub fn with_create_time(mut self, at: DateTime<Utc>) -> Self {
        self.create_time = Some(at);
        self
    }

    /// Raw field value; explicit JSON `null` reads as absent
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|v| !v.is_null())
    }

    /// Whether a non-null field is present
    #[inline]
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// String field, if present and a string
    #[inline]
    #[must_use]
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Non-blank string field
    #[must_use]
    pub fn text_field(&self, name: &str) -> Option<&str> {
        self.str_field(name).filter(|s| !s.trim().is_empty())
    }

    /// Boolean field, if present and a boolean
    #[inline]
    #[must_use]
    pub fn bool_field(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    /// Set or overwrite a field in place
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.fields.insert(name.to_string(), value.into());
    }
}

/// Parse a timestamp field value
///
/// Accepts RFC 3339 strings, epoch milliseconds, and the store's
/// `{seconds, nanoseconds}` object form (also with leading underscores, as
/// found in exports).
#[must_use]
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            DateTime::<Utc>::from_timestamp(seconds, u32::try_from(nanos).ok()?)
        }
        _ => None,
    }
}
