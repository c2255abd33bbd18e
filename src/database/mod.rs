//! # Realtime Database sync client
//!
//! Rate-limited reads, writes and live observation of a Realtime Database
//! over its REST surface (`{database_url}{path}.json`).
//!
//! Every network operation goes through the same admission pipeline: a fresh
//! credential from the [`TokenSource`](crate::platform::TokenSource), a check
//! against the [`RateLimiter`] window and a slot from the
//! [`ConnectionTracker`]. Counters are credited only after a `200 OK`.
//!
//! ## Features
//!
//! - Point-in-time CRUD through [`CrudClient`]; failures are logged and
//!   reported as `None`/`false`, never as errors
//! - Live observation through [`PathObserverRegistry`], one shared
//!   subscription per path however many handles observe it
//! - Two [`TransportStrategy`] implementations chosen by
//!   [`TransportKind`]: server-push streaming (`text/event-stream`) and
//!   interval polling
//! - FIFO connection eviction once `max_connections` slots are open
//! - Field projection of observed values through the
//!   [`document`](crate::document) resolver
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use firebase_rtdb_sync::database::{Database, DatabaseSettings};
//! use firebase_rtdb_sync::platform::StaticTokenSource;
//! use serde_json::{json, Value};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = DatabaseSettings::new("http://127.0.0.1:9000/?ns=demo").with_debug_logging(true);
//!     let database = Database::new(settings, Arc::new(StaticTokenSource::new("owner")))?;
//!
//!     database.set("testData", &json!({"name": "Test User", "age": 25})).await;
//!     let mut status = database.observe::<Value>("testData").await?;
//!     database.update("testData", &json!({"age": 30})).await;
//!
//!     while status.changed().await {
//!         println!("testData is now {:?}", status.value());
//!         if status.field("age").is_some() {
//!             break;
//!         }
//!     }
//!
//!     status.detach();
//!     database.dispose();
//!     Ok(())
//! }
//! ```

mod api;
mod backend;
mod connections;
pub mod constants;
mod crud;
pub mod error;
mod event_stream;
mod observer;
mod path;
mod polling;
mod rate_limiter;
mod settings;
mod streaming;
mod transport;

pub use api::Database;
pub use connections::{ConnectionTracker, SlotGuard, SlotId, Teardown};
pub use crud::CrudClient;
pub use error::{DatabaseError, DatabaseErrorCode, DatabaseResult};
pub use observer::{ObservableValue, ObservedValueHandle, PathObserverRegistry};
pub use rate_limiter::{OperationKind, RateLimiter, RateWindow};
pub use settings::{DatabaseSettings, RateLimits, TransportKind};
pub use transport::{
    Subscription, SubscriptionEvent, SubscriptionHandle, SubscriptionSink, TransportStrategy,
};
