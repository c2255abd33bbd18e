use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};

use crate::document::{GeoPoint, Timestamp};

/// Key marking a JSON object as a document reference: `{"__ref__": "rooms/lobby"}`.
pub const REFERENCE_KEY: &str = "__ref__";

/// A value as the document store holds it, including its native scalar kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum DocumentValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Timestamp(Timestamp),
    GeoPoint(GeoPoint),
    /// Slash-delimited path of another document.
    Reference(String),
    Array(Vec<DocumentValue>),
    Map(BTreeMap<String, DocumentValue>),
}

impl DocumentValue {
    /// Maps JSON into the store-native model.
    ///
    /// RFC 3339 strings become timestamps, objects holding exactly numeric
    /// `latitude` and `longitude` become geopoints (when in range), and
    /// `{"__ref__": "<path>"}` becomes a reference.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => DocumentValue::Null,
            Value::Bool(flag) => DocumentValue::Boolean(*flag),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => DocumentValue::Integer(integer),
                None => DocumentValue::Double(number.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(text) => match Timestamp::parse_rfc3339(text) {
                Some(timestamp) => DocumentValue::Timestamp(timestamp),
                None => DocumentValue::String(text.clone()),
            },
            Value::Array(items) => DocumentValue::Array(items.iter().map(Self::from_json).collect()),
            Value::Object(fields) => {
                if let Some(point) = geo_point_from(fields) {
                    return DocumentValue::GeoPoint(point);
                }
                if let Some(path) = reference_from(fields) {
                    return DocumentValue::Reference(path);
                }
                DocumentValue::Map(
                    fields
                        .iter()
                        .map(|(key, value)| (key.clone(), Self::from_json(value)))
                        .collect(),
                )
            }
        }
    }

    /// The child stored under `key`, if this is a map.
    pub fn get(&self, key: &str) -> Option<&DocumentValue> {
        match self {
            DocumentValue::Map(fields) => fields.get(key),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            DocumentValue::Null => "null",
            DocumentValue::Boolean(_) => "boolean",
            DocumentValue::Integer(_) => "integer",
            DocumentValue::Double(_) => "double",
            DocumentValue::String(_) => "string",
            DocumentValue::Timestamp(_) => "timestamp",
            DocumentValue::GeoPoint(_) => "geopoint",
            DocumentValue::Reference(_) => "reference",
            DocumentValue::Array(_) => "array",
            DocumentValue::Map(_) => "map",
        }
    }
}

fn geo_point_from(fields: &Map<String, Value>) -> Option<GeoPoint> {
    if fields.len() != 2 {
        return None;
    }
    let latitude = fields.get("latitude")?.as_f64()?;
    let longitude = fields.get("longitude")?.as_f64()?;
    GeoPoint::new(latitude, longitude).ok()
}

fn reference_from(fields: &Map<String, Value>) -> Option<String> {
    if fields.len() != 1 {
        return None;
    }
    fields
        .get(REFERENCE_KEY)
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Store-independent value produced by the nested field resolver.
#[derive(Clone, Debug, PartialEq)]
pub enum PortableValue {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Array(Vec<PortableValue>),
    Map(BTreeMap<String, PortableValue>),
}

impl PortableValue {
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            PortableValue::DateTime(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PortableValue::String(value) => Some(value),
            _ => None,
        }
    }

    /// Plain JSON rendering; date-times become RFC 3339 strings.
    pub fn to_json(&self) -> Value {
        match self {
            PortableValue::Null => Value::Null,
            PortableValue::Bool(flag) => Value::Bool(*flag),
            PortableValue::Integer(integer) => Value::Number((*integer).into()),
            PortableValue::Double(double) => Number::from_f64(*double)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            PortableValue::String(text) => Value::String(text.clone()),
            PortableValue::DateTime(value) => {
                Value::String(value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            PortableValue::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            PortableValue::Map(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recognises_store_native_kinds_in_json() {
        let value = DocumentValue::from_json(&json!({
            "updated": "2024-01-01T00:00:00Z",
            "where": {"latitude": 48.85, "longitude": 2.35},
            "owner": {"__ref__": "users/alice"},
            "note": "plain text",
            "count": 3,
            "ratio": 0.5,
        }));

        assert!(matches!(value.get("updated"), Some(DocumentValue::Timestamp(_))));
        assert!(matches!(value.get("where"), Some(DocumentValue::GeoPoint(_))));
        assert_eq!(
            value.get("owner"),
            Some(&DocumentValue::Reference("users/alice".into()))
        );
        assert_eq!(value.get("note"), Some(&DocumentValue::String("plain text".into())));
        assert_eq!(value.get("count"), Some(&DocumentValue::Integer(3)));
        assert_eq!(value.get("ratio"), Some(&DocumentValue::Double(0.5)));
    }

    #[test]
    fn near_misses_stay_plain_maps() {
        let extra_field = DocumentValue::from_json(&json!({
            "latitude": 1.0, "longitude": 2.0, "label": "x"
        }));
        assert_eq!(extra_field.kind_name(), "map");

        let out_of_range = DocumentValue::from_json(&json!({"latitude": 91.0, "longitude": 0.0}));
        assert_eq!(out_of_range.kind_name(), "map");
    }
}
