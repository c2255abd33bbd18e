use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use chrono::{DateTime, Utc};

use crate::logger::Logger;

static LOGGER: LazyLock<Logger> =
    LazyLock::new(|| Logger::new("@firebase/database/connections"));

/// Callback run when a slot is evicted to make room for a newer one.
pub type Teardown = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

struct ConnectionSlot {
    id: SlotId,
    path: String,
    acquired_at: DateTime<Utc>,
    teardown: Option<Teardown>,
}

impl fmt::Debug for ConnectionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSlot")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("acquired_at", &self.acquired_at)
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}

/// Bounds the number of open requests and subscriptions.
///
/// Slots are kept in acquisition order. When the bound is reached the oldest
/// slot is evicted, whatever its activity, and its teardown (if any) runs
/// outside the tracker's lock.
#[derive(Debug)]
pub struct ConnectionTracker {
    max_connections: usize,
    slots: Mutex<VecDeque<ConnectionSlot>>,
    next_id: AtomicU64,
}

impl ConnectionTracker {
    pub fn new(max_connections: usize) -> Arc<Self> {
        Arc::new(Self {
            max_connections: max_connections.max(1),
            slots: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn acquire(&self, path: &str) -> SlotId {
        self.acquire_with_teardown(path, None)
    }

    /// Records a new slot for `path`, evicting the oldest slots first when full.
    pub fn acquire_with_teardown(&self, path: &str, teardown: Option<Teardown>) -> SlotId {
        let id = SlotId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let evicted = {
            let mut slots = self.slots.lock().unwrap();
            let mut evicted = Vec::new();
            while slots.len() >= self.max_connections {
                match slots.pop_front() {
                    Some(slot) => evicted.push(slot),
                    None => break,
                }
            }
            slots.push_back(ConnectionSlot {
                id,
                path: path.to_owned(),
                acquired_at: Utc::now(),
                teardown,
            });
            evicted
        };

        for slot in evicted {
            LOGGER.debug(format!(
                "connection limit {} reached; evicting slot for '{}' opened at {}",
                self.max_connections, slot.path, slot.acquired_at
            ));
            if let Some(teardown) = slot.teardown {
                teardown();
            }
        }
        id
    }

    /// Acquires a slot that is released when the returned guard drops.
    pub fn guard(self: &Arc<Self>, path: &str) -> SlotGuard {
        let id = self.acquire(path);
        SlotGuard {
            tracker: Arc::clone(self),
            id: Some(id),
        }
    }

    /// Releases a slot without running its teardown. Returns `false` when the
    /// slot was already evicted or released.
    pub fn release(&self, id: SlotId) -> bool {
        let mut slots = self.slots.lock().unwrap();
        match slots.iter().position(|slot| slot.id == id) {
            Some(index) => {
                slots.remove(index);
                true
            }
            None => false,
        }
    }

    /// Releases the oldest slot serving `path`.
    pub fn release_path(&self, path: &str) -> bool {
        let mut slots = self.slots.lock().unwrap();
        match slots.iter().position(|slot| slot.path == path) {
            Some(index) => {
                slots.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn is_tracked(&self, id: SlotId) -> bool {
        self.slots.lock().unwrap().iter().any(|slot| slot.id == id)
    }

    pub fn open_count(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    /// Paths of the open slots, oldest first.
    pub fn tracked_paths(&self) -> Vec<String> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .map(|slot| slot.path.clone())
            .collect()
    }

    /// Drops every slot, running each teardown.
    pub fn clear(&self) {
        let drained: Vec<_> = self.slots.lock().unwrap().drain(..).collect();
        for slot in drained {
            if let Some(teardown) = slot.teardown {
                teardown();
            }
        }
    }
}

/// RAII slot; dropping it releases the slot if it is still tracked.
#[derive(Debug)]
pub struct SlotGuard {
    tracker: Arc<ConnectionTracker>,
    id: Option<SlotId>,
}

impl SlotGuard {
    pub fn id(&self) -> Option<SlotId> {
        self.id
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.tracker.release(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn exceeding_the_bound_evicts_the_first_acquired_slot() {
        let tracker = ConnectionTracker::new(50);
        let torn_down = Arc::new(AtomicUsize::new(0));

        let counter = torn_down.clone();
        let first = tracker.acquire_with_teardown(
            "/path/1",
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        for index in 2..=51 {
            tracker.acquire(&format!("/path/{index}"));
        }

        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
        assert!(!tracker.is_tracked(first));
        assert_eq!(tracker.open_count(), 50);
        let paths = tracker.tracked_paths();
        assert_eq!(paths.first().map(String::as_str), Some("/path/2"));
        assert_eq!(paths.last().map(String::as_str), Some("/path/51"));
    }

    #[test]
    fn eviction_ignores_activity() {
        let tracker = ConnectionTracker::new(2);
        tracker.acquire("/a");
        tracker.acquire("/b");
        // touching "/a" again does not protect the original slot
        tracker.acquire("/a");
        assert_eq!(tracker.tracked_paths(), vec!["/b".to_string(), "/a".to_string()]);
    }

    #[test]
    fn release_is_idempotent_and_guard_releases_on_drop() {
        let tracker = ConnectionTracker::new(4);
        let id = tracker.acquire("/a");
        assert!(tracker.release(id));
        assert!(!tracker.release(id));

        {
            let guard = tracker.guard("/b");
            assert!(guard.id().is_some());
            assert_eq!(tracker.open_count(), 1);
        }
        assert_eq!(tracker.open_count(), 0);

        tracker.acquire("/c");
        assert!(tracker.release_path("/c"));
        assert!(!tracker.release_path("/c"));
    }

    #[test]
    fn clear_runs_every_teardown() {
        let tracker = ConnectionTracker::new(4);
        let torn_down = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = torn_down.clone();
            tracker.acquire_with_teardown(
                "/x",
                Some(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            );
        }
        tracker.clear();
        assert_eq!(torn_down.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.open_count(), 0);
    }
}
