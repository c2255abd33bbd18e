use std::sync::{Arc, LazyLock, Mutex, Weak};

use chrono::{DateTime, Utc};
use futures::future::AbortHandle;

use crate::database::error::{rate_limit_exceeded, DatabaseResult};
use crate::database::settings::RateLimits;
use crate::logger::Logger;
use crate::platform::runtime::{sleep, spawn_abortable};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firebase/database/rate-limiter"));

/// Counters for the current rate window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateWindow {
    pub reads: u64,
    pub writes: u64,
    pub bytes_transferred: u64,
    pub window_start: DateTime<Utc>,
}

impl RateWindow {
    fn starting_now() -> Self {
        Self {
            reads: 0,
            writes: 0,
            bytes_transferred: 0,
            window_start: Utc::now(),
        }
    }
}

/// Whether an operation consumes the read or the write allowance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
}

/// Admits or rejects operations against per-window read, write and byte caps.
///
/// Admission never reserves capacity: counters are credited only after an
/// operation succeeds, so concurrent in-flight operations may transiently
/// overshoot a cap. Counters are zeroed by a background timer that starts on
/// the first gated operation.
#[derive(Debug)]
pub struct RateLimiter {
    limits: RateLimits,
    window: Mutex<RateWindow>,
    reset_timer: Mutex<Option<AbortHandle>>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Arc<Self> {
        Arc::new(Self {
            limits,
            window: Mutex::new(RateWindow::starting_now()),
            reset_timer: Mutex::new(None),
        })
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    /// Returns `true` when an operation moving `data_size` bytes may be issued now.
    pub fn admit(&self, data_size: u64, is_write: bool) -> bool {
        let kind = if is_write {
            OperationKind::Write
        } else {
            OperationKind::Read
        };
        self.check(kind, data_size).is_ok()
    }

    pub(crate) fn check(&self, kind: OperationKind, data_size: u64) -> DatabaseResult<()> {
        let window = *self.window.lock().unwrap();
        match kind {
            OperationKind::Read if window.reads >= self.limits.max_reads => {
                return Err(rate_limit_exceeded(format!(
                    "Read limit of {} per window reached",
                    self.limits.max_reads
                )));
            }
            OperationKind::Write if window.writes >= self.limits.max_writes => {
                return Err(rate_limit_exceeded(format!(
                    "Write limit of {} per window reached",
                    self.limits.max_writes
                )));
            }
            _ => {}
        }
        if window.bytes_transferred.saturating_add(data_size) > self.limits.max_bytes {
            return Err(rate_limit_exceeded(format!(
                "Transferring {data_size} bytes would exceed the limit of {} bytes per window",
                self.limits.max_bytes
            )));
        }
        Ok(())
    }

    /// Records a completed operation and the bytes it moved.
    pub fn credit(&self, kind: OperationKind, bytes: u64) {
        let mut window = self.window.lock().unwrap();
        match kind {
            OperationKind::Read => window.reads = window.reads.saturating_add(1),
            OperationKind::Write => window.writes = window.writes.saturating_add(1),
        }
        window.bytes_transferred = window.bytes_transferred.saturating_add(bytes);
    }

    /// Zeroes all counters and opens a new window.
    pub fn reset(&self) {
        *self.window.lock().unwrap() = RateWindow::starting_now();
    }

    pub fn status(&self) -> RateWindow {
        *self.window.lock().unwrap()
    }

    /// Starts the periodic reset timer unless it is already running.
    pub fn ensure_reset_timer(self: &Arc<Self>) {
        let mut timer = self.reset_timer.lock().unwrap();
        if timer.is_some() {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.limits.window;
        *timer = Some(spawn_abortable(async move {
            loop {
                sleep(period).await;
                let Some(limiter) = weak.upgrade() else {
                    break;
                };
                limiter.reset();
                LOGGER.debug("rate window reset");
            }
        }));
        LOGGER.debug(format!("rate window timer started ({period:?})"));
    }

    pub fn is_timer_running(&self) -> bool {
        self.reset_timer.lock().unwrap().is_some()
    }

    pub fn stop_reset_timer(&self) {
        if let Some(handle) = self.reset_timer.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Ok(mut timer) = self.reset_timer.lock() {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limits(max_reads: u64, max_writes: u64, max_bytes: u64) -> RateLimits {
        RateLimits {
            max_reads,
            max_writes,
            max_bytes,
            window: Duration::from_secs(60),
        }
    }

    #[test]
    fn writes_rejected_once_cap_is_reached_until_reset() {
        let limiter = RateLimiter::new(limits(10, 3, 10_000));
        for _ in 0..3 {
            assert!(limiter.admit(10, true));
            limiter.credit(OperationKind::Write, 10);
        }
        assert!(!limiter.admit(10, true));
        // reads have their own allowance
        assert!(limiter.admit(0, false));

        limiter.reset();
        assert!(limiter.admit(10, true));
    }

    #[test]
    fn admission_does_not_reserve_capacity() {
        let limiter = RateLimiter::new(limits(1, 1, 100));
        assert!(limiter.admit(0, false));
        assert!(limiter.admit(0, false));
        assert_eq!(limiter.status().reads, 0);
    }

    #[test]
    fn oversized_write_rejected_on_empty_window() {
        let limiter = RateLimiter::new(limits(600, 300, 50_000));
        assert!(!limiter.admit(50_001, true));
        assert!(limiter.admit(50_000, true));
        let err = limiter.check(OperationKind::Write, 60_000).unwrap_err();
        assert_eq!(err.code_str(), "database/rate-limit-exceeded");
    }

    #[test]
    fn byte_volume_accumulates_across_operations() {
        let limiter = RateLimiter::new(limits(600, 300, 100));
        limiter.credit(OperationKind::Read, 80);
        assert!(!limiter.admit(30, true));
        assert!(limiter.admit(20, false));
        assert_eq!(limiter.status().bytes_transferred, 80);
    }

    #[tokio::test]
    async fn timer_zeroes_counters_each_window() {
        let limiter = RateLimiter::new(RateLimits {
            window: Duration::from_millis(40),
            ..limits(1, 1, 100)
        });
        limiter.ensure_reset_timer();
        limiter.ensure_reset_timer();
        limiter.credit(OperationKind::Read, 5);
        assert!(!limiter.admit(0, false));

        sleep(Duration::from_millis(120)).await;
        assert!(limiter.admit(0, false));
        assert_eq!(limiter.status().bytes_transferred, 0);

        limiter.stop_reset_timer();
        assert!(!limiter.is_timer_running());
    }
}
