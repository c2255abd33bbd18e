//! Database settings surface.
//!
//! Limits, timing and transport selection for a [`Database`](super::Database),
//! validated once at construction.

use std::time::Duration;

use url::Url;

use crate::database::constants::{
    DEFAULT_MAX_BYTES_PER_MINUTE, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_READS_PER_MINUTE,
    DEFAULT_MAX_WRITES_PER_MINUTE, DEFAULT_POLLING_INTERVAL, DEFAULT_RATE_WINDOW,
};
use crate::database::error::{invalid_argument, DatabaseResult};

/// How live observations reach the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// Periodic full fetches; for runtimes that cannot hold a response open.
    Polling,
    /// One long-lived `text/event-stream` response per observed path.
    Streaming,
}

impl TransportKind {
    /// Streaming wherever the host can keep a response body open, polling on wasm32.
    pub fn platform_default() -> Self {
        if cfg!(target_arch = "wasm32") {
            TransportKind::Polling
        } else {
            TransportKind::Streaming
        }
    }
}

/// Rate limits for one rolling window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimits {
    pub max_reads: u64,
    pub max_writes: u64,
    pub max_bytes: u64,
    pub window: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            max_reads: DEFAULT_MAX_READS_PER_MINUTE,
            max_writes: DEFAULT_MAX_WRITES_PER_MINUTE,
            max_bytes: DEFAULT_MAX_BYTES_PER_MINUTE,
            window: DEFAULT_RATE_WINDOW,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DatabaseSettings {
    pub database_url: String,
    pub max_connections: usize,
    pub polling_interval: Duration,
    pub rate_limits: RateLimits,
    pub transport: TransportKind,
    pub debug_logging: bool,
}

impl DatabaseSettings {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            rate_limits: RateLimits::default(),
            transport: TransportKind::platform_default(),
            debug_logging: false,
        }
    }

    pub fn with_max_connections(mut self, value: usize) -> Self {
        self.max_connections = value;
        self
    }

    pub fn with_polling_interval(mut self, value: Duration) -> Self {
        self.polling_interval = value;
        self
    }

    pub fn with_rate_limits(mut self, value: RateLimits) -> Self {
        self.rate_limits = value;
        self
    }

    pub fn with_transport(mut self, value: TransportKind) -> Self {
        self.transport = value;
        self
    }

    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    pub(crate) fn validate(&self) -> DatabaseResult<Url> {
        if self.max_connections == 0 {
            return Err(invalid_argument("max_connections must be greater than zero"));
        }
        if self.polling_interval.is_zero() {
            return Err(invalid_argument("polling_interval must be greater than zero"));
        }
        let limits = &self.rate_limits;
        if limits.max_reads == 0 || limits.max_writes == 0 || limits.max_bytes == 0 {
            return Err(invalid_argument("rate limits must be greater than zero"));
        }
        if limits.window.is_zero() {
            return Err(invalid_argument("rate window must be greater than zero"));
        }
        Url::parse(&self.database_url).map_err(|err| {
            invalid_argument(format!(
                "Invalid database_url '{}': {err}",
                self.database_url
            ))
        })
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self::new("http://127.0.0.1:9000/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let settings = DatabaseSettings::default();
        assert_eq!(settings.max_connections, 50);
        assert_eq!(settings.polling_interval, Duration::from_millis(2_000));
        assert_eq!(settings.rate_limits.max_reads, 600);
        assert_eq!(settings.rate_limits.max_writes, 300);
        assert_eq!(settings.rate_limits.max_bytes, 50_000);
        assert!(!settings.debug_logging);
    }

    #[test]
    fn validation_rejects_zero_limits_and_bad_urls() {
        let zero = DatabaseSettings::default().with_max_connections(0);
        assert!(zero.validate().is_err());

        let bad_url = DatabaseSettings::new("not a url");
        let err = bad_url.validate().unwrap_err();
        assert_eq!(err.code_str(), "database/invalid-argument");

        let no_window = DatabaseSettings::default().with_rate_limits(RateLimits {
            window: Duration::ZERO,
            ..RateLimits::default()
        });
        assert!(no_window.validate().is_err());
    }
}
