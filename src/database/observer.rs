use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, Weak};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;

use crate::database::crud::CrudClient;
use crate::database::error::{disposed, invalid_argument, malformed_payload, DatabaseError, DatabaseResult};
use crate::database::path::{normalize_path, path_to_string};
use crate::database::transport::{Subscription, SubscriptionEvent, SubscriptionHandle, TransportStrategy};
use crate::document::{resolve, DocumentValue, PortableValue};
use crate::logger::Logger;
use crate::platform::runtime::spawn_detached;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firebase/database/observer"));

/// Bounds for values that can be observed.
pub trait ObservableValue: DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> ObservableValue for T where T: DeserializeOwned + Clone + Send + Sync + 'static {}

/// Outcome of checking a raw payload against the observed type.
enum Decoded<T> {
    Valid(T),
    Absent,
    Mismatch(DatabaseError),
}

fn decode<T: ObservableValue>(raw: &Value) -> Decoded<T> {
    if raw.is_null() {
        return Decoded::Absent;
    }
    match serde_json::from_value::<T>(raw.clone()) {
        Ok(value) => Decoded::Valid(value),
        Err(err) => Decoded::Mismatch(malformed_payload(format!(
            "value does not match the observed type: {err}"
        ))),
    }
}

struct ObservedState<T> {
    value: Option<T>,
    raw: Option<Value>,
    error: Option<DatabaseError>,
    active: bool,
}

/// Type-erased view of an observed cell, as stored in the registry.
trait ObservedCell: Send + Sync {
    fn is_closed(&self) -> bool;

    fn terminate(&self, error: DatabaseError);

    fn listener_count(&self) -> usize;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Last-known value at one path, shared by every handle observing it.
struct ObservedValue<T> {
    path: String,
    state: watch::Sender<ObservedState<T>>,
    listeners: AtomicUsize,
    subscription: Mutex<Option<SubscriptionHandle>>,
    closed: AtomicBool,
    registry: Weak<RegistryInner>,
}

impl<T: ObservableValue> ObservedValue<T> {
    fn new(path: String, registry: Weak<RegistryInner>) -> Self {
        let (state, _) = watch::channel(ObservedState {
            value: None,
            raw: None,
            error: None,
            active: true,
        });
        Self {
            path,
            state,
            listeners: AtomicUsize::new(0),
            subscription: Mutex::new(None),
            closed: AtomicBool::new(false),
            registry,
        }
    }

    fn apply_raw(&self, raw: Value) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let value = match decode::<T>(&raw) {
            Decoded::Valid(value) => Some(value),
            Decoded::Absent => None,
            Decoded::Mismatch(err) => {
                LOGGER.warn(format!("'{}': {err}", self.path));
                None
            }
        };
        let raw = if raw.is_null() { None } else { Some(raw) };
        self.state.send_modify(|state| {
            state.value = value;
            state.raw = raw;
        });
    }

    /// Starts the live subscription unless the cell was closed meanwhile.
    fn activate(self: &Arc<Self>, transport: &dyn TransportStrategy) {
        let subscription = {
            let mut slot = self.subscription.lock().unwrap();
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            let subscription = transport.activate(&self.path);
            *slot = Some(subscription.handle());
            subscription
        };
        LOGGER.debug(format!(
            "observing '{}' via {:?} transport",
            self.path,
            transport.kind()
        ));
        spawn_detached(pump(Arc::clone(self), subscription));
    }

    /// Closes the cell and cancels its subscription. Returns `false` when it
    /// was already closed.
    fn shutdown(&self) -> bool {
        let handle = {
            let mut slot = self.subscription.lock().unwrap();
            if self.closed.swap(true, Ordering::SeqCst) {
                return false;
            }
            slot.take()
        };
        if let Some(handle) = handle {
            handle.cancel();
        }
        true
    }

    /// Leaves the registry before publishing the terminal state, so a woken
    /// listener never sees its entry still registered.
    fn finish(&self, error: Option<DatabaseError>) {
        self.shutdown();
        self.unregister();
        self.state.send_modify(|state| {
            state.active = false;
            if let Some(err) = error {
                state.value = None;
                state.raw = None;
                state.error = Some(err);
            }
        });
    }

    fn add_listener(&self) {
        self.listeners.fetch_add(1, Ordering::SeqCst);
    }

    fn release_listener(&self) {
        if self.listeners.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }
        if self.shutdown() {
            LOGGER.debug(format!("last listener for '{}' detached", self.path));
        }
        self.unregister();
        self.state.send_modify(|state| state.active = false);
    }

    fn unregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_if_same(&self.path, self as *const Self as *const ());
        }
    }
}

impl<T: ObservableValue> ObservedCell for ObservedValue<T> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn terminate(&self, error: DatabaseError) {
        self.finish(Some(error));
    }

    fn listener_count(&self) -> usize {
        self.listeners.load(Ordering::SeqCst)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

async fn pump<T: ObservableValue>(cell: Arc<ObservedValue<T>>, subscription: Subscription) {
    while let Some(event) = subscription.next().await {
        match event {
            SubscriptionEvent::Value(raw) => cell.apply_raw(raw),
            SubscriptionEvent::Error(err) => {
                LOGGER.warn(format!("subscription for '{}' failed: {err}", cell.path));
                cell.finish(Some(err));
                return;
            }
        }
    }
    if !cell.is_closed() {
        LOGGER.debug(format!("subscription for '{}' ended", cell.path));
        cell.finish(None);
    }
}

struct RegistryInner {
    crud: CrudClient,
    transport: Arc<dyn TransportStrategy>,
    entries: Mutex<HashMap<String, Arc<dyn ObservedCell>>>,
    disposed: AtomicBool,
}

impl RegistryInner {
    fn remove_if_same(&self, path: &str, cell: *const ()) {
        let mut entries = self.entries.lock().unwrap();
        let same = entries
            .get(path)
            .is_some_and(|entry| Arc::as_ptr(entry) as *const () == cell);
        if same {
            entries.remove(path);
        }
    }
}

/// Multiplexes observers: at most one live subscription per path, shared by
/// every handle observing that path.
#[derive(Clone)]
pub struct PathObserverRegistry {
    inner: Arc<RegistryInner>,
}

impl PathObserverRegistry {
    pub(crate) fn new(crud: CrudClient, transport: Arc<dyn TransportStrategy>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                crud,
                transport,
                entries: Mutex::new(HashMap::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns a handle on the live value at `path`.
    ///
    /// The first observer of a path seeds the value with one fetch
    /// (best-effort) and then activates the transport; later observers share
    /// that subscription. Observing a path already observed with a different
    /// value type fails with `database/invalid-argument`.
    pub async fn observe<T: ObservableValue>(&self, path: &str) -> DatabaseResult<ObservedValueHandle<T>> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(disposed());
        }
        let key = path_to_string(&normalize_path(path)?);

        let (cell, fresh) = {
            let mut entries = self.inner.entries.lock().unwrap();
            match entries.get(&key) {
                Some(entry) if !entry.is_closed() => {
                    let cell = Arc::clone(entry)
                        .into_any()
                        .downcast::<ObservedValue<T>>()
                        .map_err(|_| {
                            invalid_argument(format!(
                                "'{key}' is already observed with a different value type"
                            ))
                        })?;
                    (cell, false)
                }
                _ => {
                    let cell = Arc::new(ObservedValue::<T>::new(
                        key.clone(),
                        Arc::downgrade(&self.inner),
                    ));
                    entries.insert(key.clone(), cell.clone() as Arc<dyn ObservedCell>);
                    (cell, true)
                }
            }
        };

        // attached before seeding so an abandoned call still detaches
        let mut handle = ObservedValueHandle::attach(Arc::clone(&cell));
        if !fresh {
            return Ok(handle);
        }

        match self.inner.crud.fetch(&key, false, &[]).await {
            Ok(raw) => cell.apply_raw(raw),
            Err(err) => LOGGER.debug(format!("initial fetch of '{key}' failed: {err}")),
        }
        handle.mark_seen();
        cell.activate(self.inner.transport.as_ref());
        Ok(handle)
    }

    pub fn is_observed(&self, path: &str) -> bool {
        let Ok(segments) = normalize_path(path) else {
            return false;
        };
        self.inner
            .entries
            .lock()
            .unwrap()
            .contains_key(&path_to_string(&segments))
    }

    /// Number of handles currently attached to `path`.
    pub fn listener_count(&self, path: &str) -> usize {
        let Ok(segments) = normalize_path(path) else {
            return 0;
        };
        self.inner
            .entries
            .lock()
            .unwrap()
            .get(&path_to_string(&segments))
            .map(|entry| entry.listener_count())
            .unwrap_or(0)
    }

    pub fn observed_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.inner.entries.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Terminates every observation; later `observe` calls fail.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        let drained: Vec<_> = self.inner.entries.lock().unwrap().drain().collect();
        for (path, entry) in drained {
            LOGGER.debug(format!("disposing observer for '{path}'"));
            entry.terminate(disposed());
        }
    }
}

impl fmt::Debug for PathObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathObserverRegistry")
            .field("paths", &self.observed_paths())
            .field("disposed", &self.inner.disposed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Caller-held reference to a shared observed value.
///
/// Cloning attaches another listener. Dropping (or [`detach`](Self::detach))
/// removes one; when the last one goes the subscription is cancelled and the
/// path is no longer observed.
pub struct ObservedValueHandle<T: ObservableValue> {
    cell: Arc<ObservedValue<T>>,
    receiver: watch::Receiver<ObservedState<T>>,
}

impl<T: ObservableValue> ObservedValueHandle<T> {
    fn attach(cell: Arc<ObservedValue<T>>) -> Self {
        cell.add_listener();
        let receiver = cell.state.subscribe();
        Self { cell, receiver }
    }

    fn mark_seen(&mut self) {
        self.receiver.borrow_and_update();
    }

    pub fn path(&self) -> &str {
        &self.cell.path
    }

    /// Last decoded value; `None` when absent, mismatched or failed.
    pub fn value(&self) -> Option<T> {
        self.receiver.borrow().value.clone()
    }

    /// Last raw payload as delivered by the transport.
    pub fn raw(&self) -> Option<Value> {
        self.receiver.borrow().raw.clone()
    }

    /// Projects the last raw payload down to `field_path`.
    pub fn field(&self, field_path: &str) -> Option<PortableValue> {
        let raw = self.raw()?;
        resolve(&DocumentValue::from_json(&raw), field_path)
    }

    /// Error that terminated the subscription, if any.
    pub fn error(&self) -> Option<DatabaseError> {
        self.receiver.borrow().error.clone()
    }

    pub fn is_active(&self) -> bool {
        self.receiver.borrow().active
    }

    /// Waits for the next delivery. Returns `false` once the subscription
    /// has terminated.
    pub async fn changed(&mut self) -> bool {
        if !self.receiver.borrow_and_update().active {
            return false;
        }
        if self.receiver.changed().await.is_err() {
            return false;
        }
        self.receiver.borrow_and_update().active
    }

    pub fn detach(self) {}
}

impl<T: ObservableValue> Clone for ObservedValueHandle<T> {
    fn clone(&self) -> Self {
        Self::attach(Arc::clone(&self.cell))
    }
}

impl<T: ObservableValue> Drop for ObservedValueHandle<T> {
    fn drop(&mut self) {
        self.cell.release_listener();
    }
}

impl<T: ObservableValue + fmt::Debug> fmt::Debug for ObservedValueHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedValueHandle")
            .field("path", &self.path())
            .field("value", &self.value())
            .field("active", &self.is_active())
            .finish()
    }
}
