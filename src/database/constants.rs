//! Default limits applied when [`DatabaseSettings`](super::DatabaseSettings) is not customised.

use std::time::Duration;

/// Upper bound on concurrently open requests plus long-lived subscriptions.
pub const DEFAULT_MAX_CONNECTIONS: usize = 50;
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(2_000);
pub const DEFAULT_MAX_READS_PER_MINUTE: u64 = 600;
pub const DEFAULT_MAX_WRITES_PER_MINUTE: u64 = 300;
pub const DEFAULT_MAX_BYTES_PER_MINUTE: u64 = 50_000;
/// Length of one rate window; counters are zeroed each time it elapses.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(60);

pub(crate) const LOGGER_PREFIX: &str = "@firebase/database";
pub(crate) const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";
