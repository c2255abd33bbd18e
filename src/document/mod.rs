//! Store-native document values and the nested field resolver.
//!
//! Documents read from a document store (or bridged from database JSON with
//! [`DocumentValue::from_json`]) carry native scalar kinds such as
//! [`Timestamp`] and [`GeoPoint`]. [`resolve`] walks a slash-delimited field
//! path and converts what it finds into a [`PortableValue`].
//!
//! ```
//! use firebase_rtdb_sync::document::{resolve, DocumentValue};
//! use serde_json::json;
//!
//! let document = DocumentValue::from_json(&json!({
//!     "data": {"lastUpdatedTime": "2024-01-01T00:00:00Z"}
//! }));
//! let updated = resolve(&document, "data/lastUpdatedTime").and_then(|v| v.as_datetime());
//! assert!(updated.is_some());
//! assert!(resolve(&document, "data/missing").is_none());
//! ```

mod geo_point;
mod resolver;
mod timestamp;
mod value;

pub use geo_point::GeoPoint;
pub use resolver::{resolve, to_portable};
pub use timestamp::Timestamp;
pub use value::{DocumentValue, PortableValue, REFERENCE_KEY};
