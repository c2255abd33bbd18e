use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::database::backend::RestBackend;
use crate::database::crud::CrudClient;
use crate::database::error::DatabaseError;
use crate::database::polling::PollingTransport;
use crate::database::settings::{DatabaseSettings, TransportKind};
use crate::database::streaming::StreamingTransport;

/// Item produced by a live subscription.
#[derive(Clone, Debug)]
pub enum SubscriptionEvent {
    /// Full value at the subscribed path (`Value::Null` when absent).
    Value(Value),
    /// Terminal failure; no further events follow.
    Error(DatabaseError),
}

type CancelHook = Box<dyn FnOnce() + Send + 'static>;

struct HandleInner {
    path: String,
    cancelled: AtomicBool,
    hooks: Mutex<Vec<CancelHook>>,
}

/// Cancellation side of a subscription. Clones share state; cancelling is
/// idempotent and runs the registered hooks exactly once.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

impl SubscriptionHandle {
    fn new(path: &str) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                path: path.to_owned(),
                cancelled: AtomicBool::new(false),
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Registers work to run on cancellation; runs it immediately when the
    /// handle is already cancelled.
    pub fn on_cancel<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut hooks = self.inner.hooks.lock().unwrap();
            if !self.is_cancelled() {
                hooks.push(Box::new(hook));
                return;
            }
        }
        hook();
    }

    /// Stops the subscription. Returns `true` only for the call that actually
    /// cancelled it.
    pub fn cancel(&self) -> bool {
        let hooks = {
            let mut hooks = self.inner.hooks.lock().unwrap();
            if self.inner.cancelled.swap(true, Ordering::SeqCst) {
                return false;
            }
            std::mem::take(&mut *hooks)
        };
        for hook in hooks {
            hook();
        }
        true
    }

    pub fn same_as(&self, other: &SubscriptionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("path", &self.path())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Producer side handed to a transport task. The subscription ends once
/// every clone has been dropped or closed.
#[derive(Clone)]
pub struct SubscriptionSink {
    sender: async_channel::Sender<SubscriptionEvent>,
    handle: SubscriptionHandle,
}

impl SubscriptionSink {
    /// Delivers an event. Returns `false` once the subscription is cancelled
    /// or nobody is listening any more.
    pub async fn send(&self, event: SubscriptionEvent) -> bool {
        if self.handle.is_cancelled() {
            return false;
        }
        self.sender.send(event).await.is_ok()
    }

    /// Delivers a terminal error and closes the channel.
    pub async fn fail(&self, error: DatabaseError) {
        let _ = self.send(SubscriptionEvent::Error(error)).await;
        self.close();
    }

    /// Like [`fail`](Self::fail) but usable from synchronous teardown code.
    pub fn fail_now(&self, error: DatabaseError) {
        if !self.handle.is_cancelled() {
            let _ = self.sender.try_send(SubscriptionEvent::Error(error));
        }
        self.close();
    }

    pub fn close(&self) {
        self.sender.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }
}

/// Live sequence of values for one path. Dropping it cancels the subscription.
pub struct Subscription {
    events: async_channel::Receiver<SubscriptionEvent>,
    handle: SubscriptionHandle,
}

impl Subscription {
    /// Creates a connected sink/subscription pair; cancelling the handle closes the channel.
    pub fn channel(path: &str) -> (SubscriptionSink, Subscription) {
        let (sender, events) = async_channel::unbounded();
        let handle = SubscriptionHandle::new(path);
        let closer = events.clone();
        handle.on_cancel(move || {
            closer.close();
        });
        (
            SubscriptionSink {
                sender,
                handle: handle.clone(),
            },
            Subscription { events, handle },
        )
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Next event, or `None` once the subscription has ended.
    pub async fn next(&self) -> Option<SubscriptionEvent> {
        self.events.recv().await.ok()
    }

    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .finish()
    }
}

/// Produces live values for a path; one implementation per transport kind.
///
/// `activate` starts producing immediately. Implementations must stop, and
/// release any connection slot, when the returned subscription is cancelled.
pub trait TransportStrategy: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn activate(&self, path: &str) -> Subscription;
}

pub(crate) fn select_transport(
    settings: &DatabaseSettings,
    backend: Arc<RestBackend>,
    crud: CrudClient,
) -> Arc<dyn TransportStrategy> {
    match settings.transport {
        TransportKind::Polling => Arc::new(PollingTransport::new(crud, settings.polling_interval)),
        TransportKind::Streaming => Arc::new(StreamingTransport::new(backend)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn cancel_runs_hooks_once_and_closes_channel() {
        let (sink, subscription) = Subscription::channel("/a");
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        subscription.handle().on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(block_on(sink.send(SubscriptionEvent::Value(json!(1)))));
        assert!(subscription.cancel());
        assert!(!subscription.cancel());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!block_on(sink.send(SubscriptionEvent::Value(json!(2)))));

        // events sent before cancellation are still drained
        assert!(matches!(
            block_on(subscription.next()),
            Some(SubscriptionEvent::Value(_))
        ));
        assert!(block_on(subscription.next()).is_none());
    }

    #[test]
    fn hooks_added_after_cancel_run_immediately() {
        let (_sink, subscription) = Subscription::channel("/a");
        subscription.cancel();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        subscription.handle().on_cancel(move || flag.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn fail_delivers_error_then_ends() {
        let (sink, subscription) = Subscription::channel("/a");
        block_on(sink.fail(crate::database::error::rate_limit_exceeded("slow down")));
        match block_on(subscription.next()) {
            Some(SubscriptionEvent::Error(err)) => {
                assert_eq!(err.code_str(), "database/rate-limit-exceeded")
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(block_on(subscription.next()).is_none());
    }

    #[test]
    fn dropping_every_sink_ends_the_subscription() {
        let (sink, subscription) = Subscription::channel("/a");
        let other = sink.clone();
        drop(sink);
        drop(other);
        assert!(block_on(subscription.next()).is_none());
        assert!(!subscription.handle().is_cancelled());
    }

    #[test]
    fn dropping_the_subscription_cancels_it() {
        let (sink, subscription) = Subscription::channel("/a");
        let handle = subscription.handle();
        drop(subscription);
        assert!(handle.is_cancelled());
        assert!(sink.is_cancelled());
    }
}
