use std::sync::LazyLock;

use chrono::{DateTime, Utc};

use crate::database::error::path_not_found;
use crate::document::{DocumentValue, PortableValue};
use crate::logger::Logger;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firebase/database/resolver"));

/// Projects `document` down to the field at `slash_path` and converts it to
/// a [`PortableValue`].
///
/// Segments address map keys, or element indexes inside arrays. An empty
/// path resolves to the whole document. A missing step yields `None` and a
/// single debug log line.
pub fn resolve(document: &DocumentValue, slash_path: &str) -> Option<PortableValue> {
    let mut current = document;
    for segment in slash_path.split('/').filter(|segment| !segment.is_empty()) {
        let next = match current {
            DocumentValue::Map(fields) => fields.get(segment),
            DocumentValue::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index)),
            _ => None,
        };
        match next {
            Some(child) => current = child,
            None => {
                let err = path_not_found(format!(
                    "no field '{segment}' while resolving '{slash_path}' ({} found)",
                    current.kind_name()
                ));
                LOGGER.debug(err.to_string());
                return None;
            }
        }
    }
    Some(to_portable(current))
}

/// Recursively replaces store-native scalars with portable equivalents.
pub fn to_portable(value: &DocumentValue) -> PortableValue {
    match value {
        DocumentValue::Null => PortableValue::Null,
        DocumentValue::Boolean(flag) => PortableValue::Bool(*flag),
        DocumentValue::Integer(integer) => PortableValue::Integer(*integer),
        DocumentValue::Double(double) => PortableValue::Double(*double),
        DocumentValue::String(text) => PortableValue::String(text.clone()),
        DocumentValue::Timestamp(timestamp) => match timestamp.to_datetime() {
            Some(value) => PortableValue::DateTime(value),
            None => PortableValue::DateTime(if timestamp.seconds < 0 {
                DateTime::<Utc>::MIN_UTC
            } else {
                DateTime::<Utc>::MAX_UTC
            }),
        },
        DocumentValue::GeoPoint(point) => PortableValue::Map(
            [
                ("latitude".to_string(), PortableValue::Double(point.latitude())),
                ("longitude".to_string(), PortableValue::Double(point.longitude())),
            ]
            .into_iter()
            .collect(),
        ),
        DocumentValue::Reference(path) => PortableValue::String(path.clone()),
        DocumentValue::Array(items) => PortableValue::Array(items.iter().map(to_portable).collect()),
        DocumentValue::Map(fields) => PortableValue::Map(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), to_portable(value)))
                .collect(),
        ),
    }
}
